use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use common::error::AppError;
use tracing::debug;

/// How the loaded text is structured, which decides how it is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Markdown,
    Json,
    Pdf,
    /// Slide text of a PowerPoint presentation
    Pptx,
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub text: String,
}

/// Turns a file on disk into raw text.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<LoadedDocument, AppError>;
}

/// Loads plain text, markdown, json, PDF and PowerPoint files, picking the
/// reader from the file extension.
#[derive(Debug, Default, Clone)]
pub struct FileDocumentLoader;

#[async_trait]
impl DocumentLoader for FileDocumentLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument, AppError> {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let kind = match (mime.type_().as_str(), mime.subtype().as_str()) {
            ("text", "markdown" | "x-markdown") => DocumentKind::Markdown,
            ("text", _) => DocumentKind::PlainText,
            ("application", "json") => DocumentKind::Json,
            ("application", "pdf") => DocumentKind::Pdf,
            ("application", "vnd.openxmlformats-officedocument.presentationml.presentation") => {
                DocumentKind::Pptx
            }
            // Extensionless uploads are accepted as long as they decode as UTF-8
            ("application", "octet-stream") => DocumentKind::PlainText,
            _ => {
                return Err(AppError::Load(format!(
                    "unsupported document type {mime} for {}",
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), %mime, ?kind, "loading document");

        let text = match kind {
            DocumentKind::Pdf => extract_pdf_text(path).await?,
            DocumentKind::Pptx => extract_pptx_text(path).await?,
            _ => read_utf8(path).await?,
        };

        Ok(LoadedDocument {
            path: path.to_path_buf(),
            kind,
            text,
        })
    }
}

async fn read_utf8(path: &Path) -> Result<String, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| AppError::Load(format!("failed to read {}: {err}", path.display())))?;

    String::from_utf8(bytes)
        .map_err(|_| AppError::Load(format!("{} is not valid UTF-8 text", path.display())))
}

async fn extract_pdf_text(path: &Path) -> Result<String, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| AppError::Load(format!("failed to read {}: {err}", path.display())))?;

    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|err| AppError::Load(format!("PDF extraction aborted: {err}")))?
        .map_err(|err| AppError::Load(format!("failed to extract text from PDF: {err}")))?;

    Ok(text.trim().to_string())
}

async fn extract_pptx_text(path: &Path) -> Result<String, AppError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_slides(&owned))
        .await
        .map_err(|err| AppError::Load(format!("PPTX extraction aborted: {err}")))?
}

fn read_slides(path: &Path) -> Result<String, AppError> {
    let file = File::open(path)
        .map_err(|err| AppError::Load(format!("failed to read {}: {err}", path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| AppError::Load(format!("{} is not a PPTX archive: {err}", path.display())))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|number| (number, name.to_owned())))
        .collect();
    if slides.is_empty() {
        return Err(AppError::Load(format!("{} contains no slides", path.display())));
    }
    slides.sort_by_key(|(number, _)| *number);

    let mut texts = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|err| AppError::Load(format!("failed to open {name}: {err}")))?
            .read_to_string(&mut xml)
            .map_err(|err| AppError::Load(format!("failed to read {name}: {err}")))?;

        let text = slide_text(&xml);
        if !text.trim().is_empty() {
            texts.push(text);
        }
    }

    Ok(texts.join("\n\n"))
}

/// `ppt/slides/slide12.xml` -> 12. Layouts, masters and `_rels` parts are skipped.
fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Text runs (`<a:t>`) of one slide, one line per paragraph (`<a:p>`).
fn slide_text(xml: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut in_run = false;
    let mut chars = xml.chars();

    while let Some(c) = chars.next() {
        if c != '<' {
            if in_run {
                line.push(c);
            }
            continue;
        }

        let mut tag = String::new();
        for tc in chars.by_ref() {
            if tc == '>' {
                break;
            }
            tag.push(tc);
        }
        let name = tag.split_whitespace().next().unwrap_or_default();

        match name {
            "a:t" => in_run = !tag.ends_with('/'),
            "/a:t" => in_run = false,
            "/a:p" => {
                let finished = decode_entities(line.trim());
                if !finished.is_empty() {
                    lines.push(finished);
                }
                line.clear();
            }
            _ => {}
        }
    }

    let trailing = decode_entities(line.trim());
    if !trailing.is_empty() {
        lines.push(trailing);
    }
    lines.join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
