//! Input documents and their paginated text.
//!
//! PDFs contribute their text layer page by page; pages whose layer is too
//! thin (scans) have their embedded images sent to OCR. Images are OCR'd as a
//! single page and plain text is used as is.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use lopdf::{Dictionary, Object, ObjectId};
use tracing::{debug, info, trace, warn};

use crate::error::{ExtractError, Result};
use crate::llm::Attachment;
use crate::ocr::OcrAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
    Text,
}

/// Raw input bytes with their classification. Owned by one request.
#[derive(Debug, Clone)]
pub struct Document {
    pub file_name: String,
    pub mime_type: String,
    pub kind: DocumentKind,
    pub bytes: Arc<[u8]>,
}

impl Document {
    /// Classify `bytes`, trusting content signatures over the declared type.
    ///
    /// # Errors
    ///
    /// [`ExtractError::UnsupportedDocument`] for anything but PDF, images and
    /// UTF-8 text.
    pub fn from_bytes(
        file_name: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        declared_mime: Option<&str>,
    ) -> Result<Self> {
        let file_name = file_name.into();
        let bytes = bytes.into();

        let mime_type = sniff(&bytes)
            .map(str::to_string)
            .or_else(|| {
                declared_mime
                    .filter(|m| !m.is_empty() && *m != "application/octet-stream")
                    .map(|m| m.split(';').next().unwrap_or(m).trim().to_lowercase())
            })
            .unwrap_or_else(|| {
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });

        let kind = if mime_type == "application/pdf" {
            Some(DocumentKind::Pdf)
        } else if mime_type.starts_with("image/") {
            Some(DocumentKind::Image)
        } else if mime_type.starts_with("text/") && std::str::from_utf8(&bytes).is_ok() {
            Some(DocumentKind::Text)
        } else {
            None
        };

        match kind {
            Some(kind) => Ok(Self {
                file_name,
                mime_type,
                kind,
                bytes,
            }),
            None => Err(ExtractError::UnsupportedDocument {
                file_name,
                mime_type,
            }),
        }
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError::file(path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(file_name, bytes, None)
    }

    /// Lowercase extension of the file name, without the dot.
    pub fn file_type(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    pub fn attachment(&self) -> Attachment {
        Attachment::new(self.mime_type.clone(), Arc::clone(&self.bytes))
    }
}

fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        Some("image/tiff")
    } else {
        None
    }
}

/// One page of document text, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub text: String,
}

impl Page {
    pub fn new(number: usize, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

/// Join pages as `[page N]` blocks within `max_chars` characters.
///
/// The page that crosses the budget keeps the text that still fits; later
/// pages are dropped.
pub fn flatten_pages(pages: &[Page], max_chars: usize) -> String {
    let mut out = String::new();
    let mut remaining = max_chars;
    for page in pages {
        let separator = usize::from(!out.is_empty());
        let header = format!("[page {}]\n", page.number);
        let text = page.text.trim();
        // Separator, ASCII header and trailing newline.
        let overhead = separator + header.len() + 1;
        let Some(room) = remaining.checked_sub(overhead).filter(|r| *r > 0) else {
            debug!(page = page.number, max_chars, "Document text truncated");
            break;
        };

        if separator == 1 {
            out.push('\n');
        }
        out.push_str(&header);
        let chars = text.chars().count();
        if chars <= room {
            out.push_str(text);
            out.push('\n');
            remaining -= overhead + chars;
        } else {
            out.extend(text.chars().take(room));
            out.push('\n');
            debug!(page = page.number, kept = room, chars, max_chars, "Page text truncated");
            break;
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// PDF pages read beyond this count are ignored.
    pub max_pages: usize,
    /// Pages with a shorter text layer are OCR'd.
    pub min_text_chars: usize,
    pub ocr_all: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_pages: 12,
            min_text_chars: 80,
            ocr_all: false,
        }
    }
}

/// Turns documents into pages, calling OCR where the text layer is missing.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    ocr: Option<OcrAdapter>,
    ocr_model: String,
    options: LoadOptions,
}

impl DocumentLoader {
    pub fn new(ocr: Option<OcrAdapter>, ocr_model: impl Into<String>, options: LoadOptions) -> Self {
        Self {
            ocr,
            ocr_model: ocr_model.into(),
            options,
        }
    }

    pub async fn load_pages(&self, document: &Document) -> Result<Vec<Page>> {
        match document.kind {
            DocumentKind::Text => {
                let text = String::from_utf8_lossy(&document.bytes).into_owned();
                Ok(vec![Page::new(1, text)])
            }
            DocumentKind::Image => {
                let text = self
                    .ocr()?
                    .extract_text(&document.bytes, &document.mime_type, &self.ocr_model)
                    .await?;
                Ok(vec![Page::new(1, text.to_string())])
            }
            DocumentKind::Pdf => self.load_pdf(document).await,
        }
    }

    fn ocr(&self) -> Result<&OcrAdapter> {
        self.ocr.as_ref().ok_or_else(|| {
            ExtractError::Config(format!(
                "OCR is needed but no service is configured for model '{}'",
                self.ocr_model
            ))
        })
    }

    async fn load_pdf(&self, document: &Document) -> Result<Vec<Page>> {
        let bytes = Arc::clone(&document.bytes);
        let options = self.options;
        let parsed = tokio::task::spawn_blocking(move || read_pdf(&bytes, options))
            .await
            .map_err(|e| ExtractError::Io(std::io::Error::other(e)))?;

        let raw_pages = parsed.map_err(|reason| {
            warn!(file = %document.file_name, %reason, "PDF could not be parsed");
            ExtractError::UnsupportedDocument {
                file_name: document.file_name.clone(),
                mime_type: document.mime_type.clone(),
            }
        })?;

        let mut pages = Vec::with_capacity(raw_pages.len());
        for raw in raw_pages {
            let mut text = raw.text;
            if raw.needs_ocr {
                for image in &raw.images {
                    let ocr_text = self
                        .ocr()?
                        .extract_text(&image.data, image.mime_type, &self.ocr_model)
                        .await?;
                    let ocr_text = ocr_text.trim();
                    if ocr_text.is_empty() || text.contains(ocr_text) {
                        continue;
                    }
                    if text.is_empty() {
                        text = ocr_text.to_string();
                    } else {
                        text.push('\n');
                        text.push_str(ocr_text);
                    }
                }
            }
            pages.push(Page::new(raw.number, text));
        }

        info!(
            name: "document.loaded",
            file = %document.file_name,
            pages = pages.len(),
            "PDF pages loaded"
        );
        Ok(pages)
    }
}

struct RawPage {
    number: usize,
    text: String,
    needs_ocr: bool,
    images: Vec<PageImage>,
}

/// Bytes sent to OCR for one page: an embedded image, or the page itself as
/// a one-page PDF when none of its images can be decoded.
struct PageImage {
    mime_type: &'static str,
    data: Vec<u8>,
}

fn read_pdf(bytes: &[u8], options: LoadOptions) -> std::result::Result<Vec<RawPage>, String> {
    let mut doc = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;
    if doc.is_encrypted() {
        doc.decrypt("").map_err(|e| format!("encrypted PDF: {e}"))?;
    }

    let mut pages = Vec::new();
    for (page_no, page_id) in doc.get_pages() {
        let number = page_no as usize;
        if number > options.max_pages {
            break;
        }
        let text = doc
            .extract_text(&[page_no])
            .unwrap_or_else(|e| {
                trace!(page = number, error = %e, "No text layer");
                String::new()
            })
            .trim()
            .to_string();

        let needs_ocr = options.ocr_all || text.chars().count() < options.min_text_chars;
        let mut images = if needs_ocr {
            page_images(&doc, page_id)
        } else {
            Vec::new()
        };
        if needs_ocr && images.is_empty() {
            match single_page_pdf(&doc, page_no) {
                Ok(data) => {
                    debug!(
                        page = number,
                        bytes = data.len(),
                        "No decodable image, sending the page as PDF"
                    );
                    images.push(PageImage {
                        mime_type: "application/pdf",
                        data,
                    });
                }
                Err(e) => {
                    warn!(page = number, error = %e, "Page needs OCR but could not be isolated");
                }
            }
        }
        pages.push(RawPage {
            number,
            text,
            needs_ocr,
            images,
        });
    }
    Ok(pages)
}

/// Copy of `doc` keeping only page `page_no`.
fn single_page_pdf(doc: &lopdf::Document, page_no: u32) -> lopdf::Result<Vec<u8>> {
    let mut single = doc.clone();
    let others: Vec<u32> = single
        .get_pages()
        .into_keys()
        .filter(|n| *n != page_no)
        .collect();
    single.delete_pages(&others);
    single.prune_objects();

    let mut out = Vec::new();
    single.save_to(&mut out)?;
    Ok(out)
}

fn page_images(doc: &lopdf::Document, page_id: ObjectId) -> Vec<PageImage> {
    let Some(resources) = page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Ok(xobjects) = resources.get(b"XObject") else {
        return Vec::new();
    };
    let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, obj)| doc.dereference(obj).ok())
        .filter_map(|(_, obj)| image_from_object(doc, obj))
        .collect()
}

/// Page resources, inherited from the page tree when not set on the page.
fn page_resources(doc: &lopdf::Document, node_id: ObjectId) -> Option<Dictionary> {
    let Ok(Object::Dictionary(dict)) = doc.get_object(node_id) else {
        return None;
    };
    if let Ok(resources) = dict.get(b"Resources") {
        if let Ok((_, Object::Dictionary(res))) = doc.dereference(resources) {
            return Some(res.clone());
        }
    }
    match dict.get(b"Parent") {
        Ok(Object::Reference(parent)) => page_resources(doc, *parent),
        _ => None,
    }
}

fn image_from_object(doc: &lopdf::Document, obj: &Object) -> Option<PageImage> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;
    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let filter = match dict.get(b"Filter") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        Ok(Object::Array(arr)) => arr.last().and_then(|o| o.as_name().ok()),
        _ => None,
    };
    match filter {
        // JPEG streams are usable as they are.
        Some(b"DCTDecode") => {
            return Some(PageImage {
                mime_type: "image/jpeg",
                data: stream.content.clone(),
            });
        }
        Some(b"JPXDecode" | b"CCITTFaxDecode" | b"JBIG2Decode") => return None,
        _ => {}
    }

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    let color_space = match dict.get(b"ColorSpace") {
        Ok(obj) => color_space(doc, obj)?,
        Err(_) => b"DeviceRGB".to_vec(),
    };

    let pixels = stream.decompressed_content().ok()?;
    encode_png(&pixels, width, height, &color_space)
}

/// Family name of a color space; ICC profiles resolve to the device space
/// with the same component count.
fn color_space(doc: &lopdf::Document, obj: &Object) -> Option<Vec<u8>> {
    match obj {
        Object::Name(name) => Some(name.clone()),
        Object::Reference(id) => color_space(doc, doc.get_object(*id).ok()?),
        Object::Array(items) => {
            let family = items.first()?.as_name().ok()?;
            if family != b"ICCBased" {
                return Some(family.to_vec());
            }
            let (_, profile) = doc.dereference(items.get(1)?).ok()?;
            let components = profile.as_stream().ok()?.dict.get(b"N").ok()?.as_i64().ok()?;
            match components {
                1 => Some(b"DeviceGray".to_vec()),
                3 => Some(b"DeviceRGB".to_vec()),
                _ => None,
            }
        }
        _ => None,
    }
}

fn encode_png(pixels: &[u8], width: u32, height: u32, color_space: &[u8]) -> Option<PageImage> {
    let area = usize::try_from(width).ok()? * usize::try_from(height).ok()?;
    let image = match color_space {
        b"DeviceGray" | b"G" if pixels.len() >= area => image::DynamicImage::ImageLuma8(
            image::GrayImage::from_raw(width, height, pixels[..area].to_vec())?,
        ),
        b"DeviceRGB" | b"RGB" if pixels.len() >= area * 3 => image::DynamicImage::ImageRgb8(
            image::RgbImage::from_raw(width, height, pixels[..area * 3].to_vec())?,
        ),
        _ => return None,
    };

    let mut data = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
        .ok()?;
    Some(PageImage {
        mime_type: "image/png",
        data,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::{OcrService, ProviderKind};
    use crate::ocr::OcrCache;
    use async_trait::async_trait;
    use lopdf::content::{Content, Operation};
    use lopdf::dictionary;

    /// Minimal single-font PDF with one text line per page.
    pub(crate) fn pdf_with_pages(lines: &[&str]) -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for line in lines {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(lopdf::Stream::new(
                dictionary! {},
                content.encode().unwrap(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = i64::try_from(kids.len()).unwrap();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[derive(Debug)]
    struct FixedOcr;

    #[async_trait]
    impl OcrService for FixedOcr {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Mistral
        }

        async fn transcribe(&self, _image: &[u8], _mime: &str, _model: &str) -> Result<String> {
            Ok("Texte reconnu".to_string())
        }
    }

    /// Keeps the inputs it was asked to transcribe.
    #[derive(Debug, Default)]
    struct RecordingOcr {
        inputs: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl OcrService for RecordingOcr {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Mistral
        }

        async fn transcribe(&self, image: &[u8], mime: &str, _model: &str) -> Result<String> {
            self.inputs
                .lock()
                .unwrap()
                .push((mime.to_string(), image.to_vec()));
            Ok("Texte reconnu".to_string())
        }
    }

    #[test]
    fn test_classification_prefers_signature() {
        let doc = Document::from_bytes("scan.bin", b"%PDF-1.7 rest".to_vec(), None).unwrap();
        assert_eq!(doc.kind, DocumentKind::Pdf);

        let doc =
            Document::from_bytes("photo.pdf", b"\x89PNG\r\n\x1a\n....".to_vec(), None).unwrap();
        assert_eq!(doc.kind, DocumentKind::Image);
        assert_eq!(doc.mime_type, "image/png");
        assert_eq!(doc.file_type(), "pdf");
    }

    #[test]
    fn test_text_and_unsupported() {
        let doc = Document::from_bytes("notes.txt", b"Syndic: ABC".to_vec(), None).unwrap();
        assert_eq!(doc.kind, DocumentKind::Text);

        let err = Document::from_bytes("archive.zip", b"PK\x03\x04".to_vec(), None).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedDocument");

        let err = Document::from_bytes(
            "data.xlsx",
            b"PK\x03\x04".to_vec(),
            Some("application/octet-stream"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnsupportedDocument");
    }

    #[test]
    fn test_flatten_pages_budget() {
        let pages = vec![Page::new(1, "  alpha "), Page::new(2, "beta")];
        assert_eq!(
            flatten_pages(&pages, 1000),
            "[page 1]\nalpha\n\n[page 2]\nbeta\n"
        );
        // The second block would overflow the budget.
        assert_eq!(flatten_pages(&pages, 20), "[page 1]\nalpha\n");
        assert_eq!(flatten_pages(&pages, 5), "");
    }

    #[test]
    fn test_flatten_pages_truncates_oversized_page() {
        let pages = vec![Page::new(1, "é".repeat(42_000)), Page::new(2, "suite")];
        let text = flatten_pages(&pages, 32_000);

        assert_eq!(text.chars().count(), 32_000);
        assert!(text.starts_with("[page 1]\néé"));
        assert!(text.ends_with("é\n"));
        assert!(!text.contains("[page 2]"));
    }

    #[tokio::test]
    async fn test_text_document_is_one_page() {
        let loader = DocumentLoader::new(None, "pixtral-large-latest", LoadOptions::default());
        let doc = Document::from_bytes("notes.txt", b"Ascenseur OTIS".to_vec(), None).unwrap();
        let pages = loader.load_pages(&doc).await.unwrap();
        assert_eq!(pages, vec![Page::new(1, "Ascenseur OTIS")]);
    }

    #[tokio::test]
    async fn test_image_without_ocr_is_config_error() {
        let loader = DocumentLoader::new(None, "pixtral-large-latest", LoadOptions::default());
        let doc = Document::from_bytes("scan.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0], None).unwrap();
        let err = loader.load_pages(&doc).await.unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[tokio::test]
    async fn test_image_is_transcribed() {
        let adapter = OcrAdapter::new(Arc::new(FixedOcr), OcrCache::new());
        let loader = DocumentLoader::new(Some(adapter), "pixtral-large-latest", LoadOptions::default());
        let doc = Document::from_bytes("scan.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0], None).unwrap();
        let pages = loader.load_pages(&doc).await.unwrap();
        assert_eq!(pages, vec![Page::new(1, "Texte reconnu")]);
    }

    #[tokio::test]
    async fn test_pdf_text_layer_and_max_pages() {
        let long = "Carnet d'entretien de l'immeuble situe 12 rue des Lilas, syndic Foncia Paris";
        let bytes = pdf_with_pages(&[long, long, long]);
        let loader = DocumentLoader::new(
            None,
            "pixtral-large-latest",
            LoadOptions {
                max_pages: 2,
                min_text_chars: 10,
                ocr_all: false,
            },
        );
        let doc = Document::from_bytes("carnet.pdf", bytes, None).unwrap();
        let pages = loader.load_pages(&doc).await.unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert!(pages[0].text.contains("rue des Lilas"));
    }

    #[tokio::test]
    async fn test_scanned_page_without_image_is_sent_as_pdf() {
        let ocr = Arc::new(RecordingOcr::default());
        let adapter = OcrAdapter::new(Arc::clone(&ocr) as Arc<dyn OcrService>, OcrCache::new());
        let loader = DocumentLoader::new(Some(adapter), "mistral-ocr-latest", LoadOptions::default());
        let bytes = pdf_with_pages(&["p1", "p2"]);
        let doc = Document::from_bytes("scan.pdf", bytes, None).unwrap();

        let pages = loader.load_pages(&doc).await.unwrap();

        assert_eq!(pages.len(), 2);
        assert!(pages[0].text.ends_with("Texte reconnu"));
        let inputs = ocr.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 2);
        for (mime, data) in inputs.iter() {
            assert_eq!(mime, "application/pdf");
            let single = lopdf::Document::load_mem(data).unwrap();
            assert_eq!(single.get_pages().len(), 1);
        }
    }

    #[test]
    fn test_color_space_arrays() {
        let mut doc = lopdf::Document::with_version("1.5");
        let gray_profile = doc.add_object(lopdf::Stream::new(dictionary! { "N" => 1 }, vec![]));
        let cmyk_profile = doc.add_object(lopdf::Stream::new(dictionary! { "N" => 4 }, vec![]));

        let icc = |id: ObjectId| Object::Array(vec![Object::Name(b"ICCBased".to_vec()), id.into()]);
        assert_eq!(color_space(&doc, &icc(gray_profile)), Some(b"DeviceGray".to_vec()));
        assert_eq!(color_space(&doc, &icc(cmyk_profile)), None);

        let indexed = Object::Array(vec![
            Object::Name(b"Indexed".to_vec()),
            Object::Name(b"DeviceRGB".to_vec()),
            255.into(),
        ]);
        assert_eq!(color_space(&doc, &indexed), Some(b"Indexed".to_vec()));
        // Palette images are not decoded here; the page goes to OCR as a PDF.
        assert!(encode_png(&[0; 4], 2, 2, b"Indexed").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_unsupported() {
        let loader = DocumentLoader::new(None, "m", LoadOptions::default());
        let doc = Document::from_bytes("broken.pdf", b"%PDF-1.4 garbage".to_vec(), None).unwrap();
        let err = loader.load_pages(&doc).await.unwrap_err();
        assert_eq!(err.kind(), "UnsupportedDocument");
    }
}
