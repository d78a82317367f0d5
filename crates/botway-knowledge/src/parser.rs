use botway_common::{Error, Result};
use regex::Regex;

/// Converts raw file bytes into plain text for chunking. Binary formats
/// (pdf, docx, xlsx, epub) are provided by external parsers plugged into
/// the registry; the built-ins cover the text-based formats.
pub trait FileParser: Send + Sync {
    fn supports(&self, extension: &str) -> bool;
    fn parse(&self, bytes: &[u8]) -> Result<String>;
}

/// txt / md passthrough.
pub struct PlainTextParser;

impl FileParser for PlainTextParser {
    fn supports(&self, extension: &str) -> bool {
        matches!(extension, "txt" | "md")
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// csv rows flattened to one line per record.
pub struct CsvParser;

impl FileParser for CsvParser {
    fn supports(&self, extension: &str) -> bool {
        extension == "csv"
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        let text = String::from_utf8_lossy(bytes);
        let rows: Vec<String> = text
            .lines()
            .map(|line| {
                line.split(',')
                    .map(|cell| cell.trim().trim_matches('"'))
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect();
        Ok(rows.join("\n"))
    }
}

/// html with tags stripped and common entities decoded.
pub struct HtmlParser {
    tag_re: Regex,
}

impl HtmlParser {
    pub fn new() -> Self {
        Self {
            tag_re: Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]+>")
                .expect("static regex"),
        }
    }
}

impl Default for HtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FileParser for HtmlParser {
    fn supports(&self, extension: &str) -> bool {
        matches!(extension, "html" | "htm")
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        let html = String::from_utf8_lossy(bytes);
        let stripped = self.tag_re.replace_all(&html, " ");
        let decoded = stripped
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'");
        let collapsed: Vec<&str> = decoded.split_whitespace().collect();
        Ok(collapsed.join(" "))
    }
}

/// Parser lookup by extension.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn FileParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in text-based parsers.
    pub fn builtin() -> Self {
        Self {
            parsers: vec![
                Box::new(PlainTextParser),
                Box::new(CsvParser),
                Box::new(HtmlParser::new()),
            ],
        }
    }

    pub fn register(&mut self, parser: Box<dyn FileParser>) {
        self.parsers.push(parser);
    }

    pub fn parse(&self, extension: &str, bytes: &[u8]) -> Result<String> {
        let ext = extension.to_ascii_lowercase();
        self.parsers
            .iter()
            .find(|p| p.supports(&ext))
            .ok_or_else(|| Error::Parse(format!("unsupported file extension: {extension}")))?
            .parse(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let reg = ParserRegistry::builtin();
        assert_eq!(reg.parse("txt", b"hello").unwrap(), "hello");
        assert_eq!(reg.parse("md", b"# title").unwrap(), "# title");
    }

    #[test]
    fn csv_rows_are_flattened() {
        let reg = ParserRegistry::builtin();
        let out = reg.parse("csv", b"a,b\n1,\"two\"").unwrap();
        assert_eq!(out, "a | b\n1 | two");
    }

    #[test]
    fn html_tags_are_stripped() {
        let reg = ParserRegistry::builtin();
        let out = reg
            .parse(
                "html",
                b"<html><script>bad()</script><body><p>Hello &amp; welcome</p></body></html>",
            )
            .unwrap();
        assert_eq!(out, "Hello & welcome");
    }

    #[test]
    fn unknown_extension_is_a_parse_error() {
        let reg = ParserRegistry::builtin();
        let err = reg.parse("exe", b"MZ").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let reg = ParserRegistry::builtin();
        assert!(reg.parse("TXT", b"x").is_ok());
    }
}
