use serde::{Deserialize, Serialize};

/// Where the bytes of an image live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Url(String),
    Base64(String),
    Path(String),
}

/// One node of a forwarded transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardNode {
    pub sender_id: String,
    pub sender_name: String,
    pub chain: MessageChain,
}

/// A single typed part of a platform message.
///
/// Adapters assemble these from platform payloads; the pipeline only ever
/// pattern-matches on them. The first element of any inbound chain is a
/// `Source` marker carrying the platform message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageElement {
    Source {
        message_id: String,
        time: i64,
    },
    Text {
        text: String,
    },
    At {
        target: String,
    },
    AtAll,
    Image {
        source: ImageSource,
    },
    Voice {
        url: Option<String>,
        path: Option<String>,
        length_secs: Option<u32>,
    },
    File {
        name: String,
        url: Option<String>,
        path: Option<String>,
        size: Option<u64>,
    },
    Quote {
        message_id: String,
        origin: MessageChain,
    },
    Forward {
        nodes: Vec<ForwardNode>,
    },
    Face {
        id: i64,
        name: String,
    },
    Unknown {
        raw: serde_json::Value,
    },
}

/// Ordered sequence of message parts. Immutable once an adapter has
/// assembled it; stages build new chains instead of editing old ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageChain(Vec<MessageElement>);

impl MessageChain {
    pub fn new(elements: Vec<MessageElement>) -> Self {
        Self(elements)
    }

    /// A chain holding a single text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self(vec![MessageElement::Text { text: text.into() }])
    }

    pub fn elements(&self) -> &[MessageElement] {
        &self.0
    }

    pub fn into_elements(self) -> Vec<MessageElement> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Concatenation of all text parts in order.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for el in &self.0 {
            if let MessageElement::Text { text } = el {
                out.push_str(text);
            }
        }
        out
    }

    /// True when every element is a plain text part. Source markers do not
    /// count against this (they are bookkeeping, not content).
    pub fn is_plain_only(&self) -> bool {
        self.0.iter().all(|el| {
            matches!(
                el,
                MessageElement::Text { .. } | MessageElement::Source { .. }
            )
        })
    }

    /// The leading source marker, if the adapter attached one.
    pub fn source(&self) -> Option<(&str, i64)> {
        match self.0.first() {
            Some(MessageElement::Source { message_id, time }) => Some((message_id, *time)),
            _ => None,
        }
    }

    /// The first quote part, if any.
    pub fn quote(&self) -> Option<(&str, &MessageChain)> {
        self.0.iter().find_map(|el| match el {
            MessageElement::Quote { message_id, origin } => Some((message_id.as_str(), origin)),
            _ => None,
        })
    }

    /// A new chain with `element` prepended.
    pub fn with_prefix(self, element: MessageElement) -> Self {
        let mut elements = Vec::with_capacity(self.0.len() + 1);
        elements.push(element);
        elements.extend(self.0);
        Self(elements)
    }
}

impl From<Vec<MessageElement>> for MessageChain {
    fn from(elements: Vec<MessageElement>) -> Self {
        Self(elements)
    }
}

impl IntoIterator for MessageChain {
    type Item = MessageElement;
    type IntoIter = std::vec::IntoIter<MessageElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageChain {
    type Item = &'a MessageElement;
    type IntoIter = std::slice::Iter<'a, MessageElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chain() -> MessageChain {
        MessageChain::new(vec![
            MessageElement::Source {
                message_id: "m1".into(),
                time: 1_700_000_000,
            },
            MessageElement::Text {
                text: "hello ".into(),
            },
            MessageElement::At {
                target: "1234".into(),
            },
            MessageElement::Text {
                text: "world".into(),
            },
        ])
    }

    #[test]
    fn plain_text_concatenates_text_parts_in_order() {
        assert_eq!(sample_chain().plain_text(), "hello world");
    }

    #[test]
    fn source_marker_is_exposed() {
        let chain = sample_chain();
        let (id, time) = chain.source().expect("chain has a source marker");
        assert_eq!(id, "m1");
        assert_eq!(time, 1_700_000_000);
    }

    #[test]
    fn plain_only_ignores_source_markers() {
        let chain = MessageChain::new(vec![
            MessageElement::Source {
                message_id: "m2".into(),
                time: 0,
            },
            MessageElement::Text { text: "hi".into() },
        ]);
        assert!(chain.is_plain_only());
        assert!(!sample_chain().is_plain_only());
    }

    #[test]
    fn quote_lookup_finds_nested_chain() {
        let quoted = MessageChain::text("original");
        let chain = MessageChain::new(vec![
            MessageElement::Quote {
                message_id: "m0".into(),
                origin: quoted.clone(),
            },
            MessageElement::Text {
                text: "reply".into(),
            },
        ]);
        let (id, origin) = chain.quote().expect("chain has a quote");
        assert_eq!(id, "m0");
        assert_eq!(origin.plain_text(), "original");
    }

    #[test]
    fn serde_round_trip_preserves_variants() {
        let chain = sample_chain();
        let json = serde_json::to_string(&chain).unwrap();
        let back: MessageChain = serde_json::from_str(&json).unwrap();
        assert_eq!(chain, back);
    }

    #[test]
    fn with_prefix_prepends() {
        let chain = MessageChain::text("body").with_prefix(MessageElement::At {
            target: "u1".into(),
        });
        assert!(matches!(
            chain.elements()[0],
            MessageElement::At { ref target } if target == "u1"
        ));
        assert_eq!(chain.plain_text(), "body");
    }
}
