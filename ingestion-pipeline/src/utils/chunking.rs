use common::{error::AppError, utils::config::AppConfig};
use text_splitter::{Characters, ChunkCapacity, ChunkConfig, MarkdownSplitter, TextSplitter};

use super::file_text_extraction::{DocumentKind, LoadedDocument};

/// Cuts a loaded document into the fragments that become index nodes.
pub trait NodeParser: Send + Sync {
    fn parse(&self, document: &LoadedDocument) -> Result<Vec<String>, AppError>;
}

/// Character-bounded splitter. Markdown documents are split along their
/// structure, everything else along sentence and whitespace boundaries.
#[derive(Debug, Clone)]
pub struct TextSplitterParser {
    min_chars: usize,
    max_chars: usize,
    overlap_chars: usize,
}

impl TextSplitterParser {
    pub fn new(min_chars: usize, max_chars: usize, overlap_chars: usize) -> Result<Self, AppError> {
        let parser = Self {
            min_chars,
            max_chars,
            overlap_chars,
        };
        parser.chunk_config()?;
        Ok(parser)
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            config.chunk_min_chars,
            config.chunk_max_chars,
            config.chunk_overlap_chars,
        )
    }

    fn chunk_config(&self) -> Result<ChunkConfig<Characters>, AppError> {
        let capacity = ChunkCapacity::new(self.min_chars)
            .with_max(self.max_chars)
            .map_err(|e| AppError::Configuration(format!("invalid chunk bounds: {e}")))?;

        ChunkConfig::new(capacity)
            .with_overlap(self.overlap_chars)
            .map_err(|e| AppError::Configuration(format!("invalid chunk overlap: {e}")))
    }
}

impl NodeParser for TextSplitterParser {
    fn parse(&self, document: &LoadedDocument) -> Result<Vec<String>, AppError> {
        if document.text.trim().is_empty() {
            return Err(AppError::Parse(format!(
                "{} contains no text",
                document.path.display()
            )));
        }

        let config = self.chunk_config()?;
        let chunks: Vec<String> = match document.kind {
            DocumentKind::Markdown => MarkdownSplitter::new(config)
                .chunks(&document.text)
                .map(str::to_owned)
                .collect(),
            _ => TextSplitter::new(config)
                .chunks(&document.text)
                .map(str::to_owned)
                .collect(),
        };

        if chunks.is_empty() {
            return Err(AppError::Parse(format!(
                "{} produced no nodes",
                document.path.display()
            )));
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn document(kind: DocumentKind, text: &str) -> LoadedDocument {
        LoadedDocument {
            path: PathBuf::from("doc.txt"),
            kind,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_short_text_is_a_single_node() {
        let parser = TextSplitterParser::new(10, 100, 0).expect("parser");
        let nodes = parser
            .parse(&document(DocumentKind::PlainText, "The sky is blue."))
            .expect("parse");
        assert_eq!(nodes, vec!["The sky is blue.".to_string()]);
    }

    #[test]
    fn test_long_text_respects_max_chars() {
        let parser = TextSplitterParser::new(20, 40, 0).expect("parser");
        let text = "One sentence here. Another sentence there. ".repeat(20);
        let nodes = parser
            .parse(&document(DocumentKind::PlainText, &text))
            .expect("parse");
        assert!(nodes.len() > 1);
        assert!(nodes.iter().all(|node| node.chars().count() <= 40));
    }

    #[test]
    fn test_markdown_is_split_by_structure() {
        let parser = TextSplitterParser::new(5, 30, 0).expect("parser");
        let nodes = parser
            .parse(&document(
                DocumentKind::Markdown,
                "# Colors\n\nThe sky is blue.\n\n# Fruit\n\nBananas are yellow.",
            ))
            .expect("parse");
        assert!(nodes.iter().any(|node| node.contains("blue")));
        assert!(nodes.iter().all(|node| node.chars().count() <= 30));
    }

    #[test]
    fn test_whitespace_only_text_is_a_parse_error() {
        let parser = TextSplitterParser::new(10, 100, 0).expect("parser");
        assert!(matches!(
            parser.parse(&document(DocumentKind::PlainText, " \n\t ")),
            Err(AppError::Parse(_))
        ));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_capacity() {
        assert!(matches!(
            TextSplitterParser::new(10, 20, 50),
            Err(AppError::Configuration(_))
        ));
    }
}
