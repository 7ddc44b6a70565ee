//! Document model: the settings option bags consumed by a conversion.
//!
//! The native engine is configured through flat, string-keyed settings
//! ("documentTitle", "margin.top", "quality", …). Every field here is
//! optional, and **only set fields produce a native `set_*_setting` call** —
//! an unset field leaves the engine's own default untouched instead of
//! overriding it with a guessed value. [`PdfGlobalSettings::entries`] and
//! friends collect exactly the set fields as `(wire name, value)` pairs.
//!
//! These are plain serializable data; the conversion core reads them and
//! never mutates them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WkhtmltoxError};

/// A flat list of `(wire name, value)` settings to write to the engine.
pub type SettingEntries = Vec<(&'static str, String)>;

fn push_str(out: &mut SettingEntries, name: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        out.push((name, v.clone()));
    }
}

fn push_num(out: &mut SettingEntries, name: &'static str, value: &Option<u32>) {
    if let Some(v) = value {
        out.push((name, v.to_string()));
    }
}

/// Booleans cross the ABI as the strings "true" / "false".
fn push_bool(out: &mut SettingEntries, name: &'static str, value: &Option<bool>) {
    if let Some(v) = value {
        out.push((name, if *v { "true" } else { "false" }.to_string()));
    }
}

// ── PDF flavor ───────────────────────────────────────────────────────────

/// Document-wide settings for an HTML→PDF conversion.
///
/// Wire names follow the engine's global-settings table
/// (`documentTitle`, `size.pageSize`, `margin.top`, …).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfGlobalSettings {
    /// Title stored in the produced document. Wire name: `documentTitle`.
    pub document_title: Option<String>,
    /// Output path; leave unset to retrieve the result in memory.
    pub out: Option<String>,
    /// "pdf" or "ps". Wire name: `outputFormat`.
    pub output_format: Option<String>,
    /// Rendering resolution in dots per inch.
    pub dpi: Option<u32>,
    /// Number of copies to produce.
    pub copies: Option<u32>,
    /// Collate when printing multiple copies.
    pub collate: Option<bool>,
    /// "Portrait" or "Landscape".
    pub orientation: Option<String>,
    /// Named paper size, e.g. "A4" or "Letter". Wire name: `size.pageSize`.
    pub page_size: Option<String>,
    /// Margins with units, e.g. "10mm". Wire names: `margin.top` etc.
    pub margin_top: Option<String>,
    pub margin_bottom: Option<String>,
    pub margin_left: Option<String>,
    pub margin_right: Option<String>,
    /// "Color" or "Grayscale". Wire name: `colorMode`.
    pub color_mode: Option<String>,
    /// Generate a document outline (PDF bookmarks).
    pub outline: Option<bool>,
    /// Maximum outline depth. Wire name: `outlineDepth`.
    pub outline_depth: Option<u32>,
    /// Maximum DPI for embedded images. Wire name: `imageDPI`.
    pub image_dpi: Option<u32>,
    /// JPEG quality (1–100) for re-encoded images. Wire name: `imageQuality`.
    pub image_quality: Option<u32>,
    /// Use lossless object-stream compression. Wire name: `useCompression`.
    pub use_compression: Option<bool>,
    /// Path to a Netscape-format cookie jar. Wire name: `load.cookieJar`.
    pub cookie_jar: Option<String>,
}

impl PdfGlobalSettings {
    /// Collect the set fields as `(wire name, value)` pairs, in field order.
    pub fn entries(&self) -> SettingEntries {
        let mut out = SettingEntries::new();
        push_str(&mut out, "documentTitle", &self.document_title);
        push_str(&mut out, "out", &self.out);
        push_str(&mut out, "outputFormat", &self.output_format);
        push_num(&mut out, "dpi", &self.dpi);
        push_num(&mut out, "copies", &self.copies);
        push_bool(&mut out, "collate", &self.collate);
        push_str(&mut out, "orientation", &self.orientation);
        push_str(&mut out, "size.pageSize", &self.page_size);
        push_str(&mut out, "margin.top", &self.margin_top);
        push_str(&mut out, "margin.bottom", &self.margin_bottom);
        push_str(&mut out, "margin.left", &self.margin_left);
        push_str(&mut out, "margin.right", &self.margin_right);
        push_str(&mut out, "colorMode", &self.color_mode);
        push_bool(&mut out, "outline", &self.outline);
        push_num(&mut out, "outlineDepth", &self.outline_depth);
        push_num(&mut out, "imageDPI", &self.image_dpi);
        push_num(&mut out, "imageQuality", &self.image_quality);
        push_bool(&mut out, "useCompression", &self.use_compression);
        push_str(&mut out, "load.cookieJar", &self.cookie_jar);
        out
    }
}

/// Per-object settings for one content unit of a PDF document.
///
/// Exactly one content source must be set: [`html_content`] (inline HTML,
/// handed to the engine alongside the object registration) or [`page`]
/// (a source locator — file path or URL, wire name `page`).
///
/// [`html_content`]: PdfObjectSettings::html_content
/// [`page`]: PdfObjectSettings::page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfObjectSettings {
    /// Inline HTML for this object. Mutually exclusive with `page`.
    pub html_content: Option<String>,
    /// Source locator (path or URL). Wire name: `page`.
    pub page: Option<String>,
    /// Make external hyperlinks clickable. Wire name: `useExternalLinks`.
    pub use_external_links: Option<bool>,
    /// Turn internal anchors into PDF links. Wire name: `useLocalLinks`.
    pub use_local_links: Option<bool>,
    /// Convert HTML forms to PDF forms. Wire name: `produceForms`.
    pub produce_forms: Option<bool>,
    /// Include this object in the outline. Wire name: `includeInOutline`.
    pub include_in_outline: Option<bool>,
    /// Deny `file://` access from the page. Wire name: `load.blockLocalFileAccess`.
    pub block_local_file_access: Option<bool>,
    /// Print the page background. Wire name: `web.background`.
    pub background: Option<bool>,
    /// Load referenced images. Wire name: `web.loadImages`.
    pub load_images: Option<bool>,
    /// Run JavaScript while rendering. Wire name: `web.enableJavascript`.
    pub enable_javascript: Option<bool>,
    /// Fallback text encoding. Wire name: `web.defaultEncoding`.
    pub default_encoding: Option<String>,
    /// Centered header text. Wire name: `header.center`.
    pub header_center: Option<String>,
    /// Centered footer text. Wire name: `footer.center`.
    pub footer_center: Option<String>,
}

impl PdfObjectSettings {
    /// Collect the set fields as `(wire name, value)` pairs.
    ///
    /// `html_content` is not a setting — it travels with the object
    /// registration itself — so it never appears here.
    pub fn entries(&self) -> SettingEntries {
        let mut out = SettingEntries::new();
        push_str(&mut out, "page", &self.page);
        push_bool(&mut out, "useExternalLinks", &self.use_external_links);
        push_bool(&mut out, "useLocalLinks", &self.use_local_links);
        push_bool(&mut out, "produceForms", &self.produce_forms);
        push_bool(&mut out, "includeInOutline", &self.include_in_outline);
        push_bool(
            &mut out,
            "load.blockLocalFileAccess",
            &self.block_local_file_access,
        );
        push_bool(&mut out, "web.background", &self.background);
        push_bool(&mut out, "web.loadImages", &self.load_images);
        push_bool(&mut out, "web.enableJavascript", &self.enable_javascript);
        push_str(&mut out, "web.defaultEncoding", &self.default_encoding);
        push_str(&mut out, "header.center", &self.header_center);
        push_str(&mut out, "footer.center", &self.footer_center);
        out
    }
}

/// An HTML→PDF conversion request: global settings plus an ordered sequence
/// of content objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlToPdfDocument {
    pub global_settings: PdfGlobalSettings,
    pub object_settings: Vec<PdfObjectSettings>,
}

impl HtmlToPdfDocument {
    /// Convenience constructor for the common single-inline-object case.
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            global_settings: PdfGlobalSettings::default(),
            object_settings: vec![PdfObjectSettings {
                html_content: Some(html.into()),
                ..Default::default()
            }],
        }
    }

    /// Structural validation, run before any native call.
    pub fn validate(&self) -> Result<()> {
        if self.object_settings.is_empty() {
            return Err(WkhtmltoxError::invalid(
                "a PDF document must contain at least one object",
            ));
        }
        for (i, obj) in self.object_settings.iter().enumerate() {
            match (&obj.html_content, &obj.page) {
                (None, None) => {
                    return Err(WkhtmltoxError::invalid(format!(
                        "object {i} has neither inline HTML nor a source locator"
                    )));
                }
                (Some(_), Some(_)) => {
                    return Err(WkhtmltoxError::invalid(format!(
                        "object {i} sets both inline HTML and a source locator"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ── Image flavor ─────────────────────────────────────────────────────────

/// Settings for an HTML→Image conversion.
///
/// The image engine renders a single implicit object, so the content source
/// lives here rather than in a per-object list: either [`in_`] (a source
/// locator, wire name `in`) or [`html_content`] (inline HTML, written to a
/// managed temporary file by the converter).
///
/// [`in_`]: ImageSettings::in_
/// [`html_content`]: ImageSettings::html_content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Source locator (path or URL). Wire name: `in`.
    #[serde(rename = "in")]
    pub in_: Option<String>,
    /// Inline HTML. Mutually exclusive with `in_`; never a wire setting.
    pub html_content: Option<String>,
    /// Output path; leave unset to retrieve the result in memory.
    pub out: Option<String>,
    /// Output format, e.g. "png" or "jpg". Wire name: `fmt`.
    pub format: Option<String>,
    /// Compression quality, 0–100 as a string. Wire name: `quality`.
    pub quality: Option<String>,
    /// Virtual screen width in pixels. Wire name: `screenWidth`.
    pub screen_width: Option<u32>,
    /// Shrink the image to its minimal width. Wire name: `smartWidth`.
    pub smart_width: Option<bool>,
    /// Transparent background (PNG only). Wire name: `transparent`.
    pub transparent: Option<bool>,
    /// Crop rectangle. Wire names: `crop.left` etc.
    pub crop_left: Option<u32>,
    pub crop_top: Option<u32>,
    pub crop_width: Option<u32>,
    pub crop_height: Option<u32>,
}

impl ImageSettings {
    /// Collect the set fields as `(wire name, value)` pairs.
    ///
    /// `html_content` is excluded; the converter materialises it as a file
    /// and writes the path through the `in` setting itself.
    pub fn entries(&self) -> SettingEntries {
        let mut out = SettingEntries::new();
        push_str(&mut out, "in", &self.in_);
        push_str(&mut out, "out", &self.out);
        push_str(&mut out, "fmt", &self.format);
        push_str(&mut out, "quality", &self.quality);
        push_num(&mut out, "screenWidth", &self.screen_width);
        push_bool(&mut out, "smartWidth", &self.smart_width);
        push_bool(&mut out, "transparent", &self.transparent);
        push_num(&mut out, "crop.left", &self.crop_left);
        push_num(&mut out, "crop.top", &self.crop_top);
        push_num(&mut out, "crop.width", &self.crop_width);
        push_num(&mut out, "crop.height", &self.crop_height);
        out
    }
}

/// An HTML→Image conversion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlToImageDocument {
    pub image_settings: ImageSettings,
}

impl HtmlToImageDocument {
    /// Convenience constructor for the common inline-HTML case.
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            image_settings: ImageSettings {
                html_content: Some(html.into()),
                ..Default::default()
            },
        }
    }

    /// Structural validation, run before any native call.
    pub fn validate(&self) -> Result<()> {
        match (&self.image_settings.html_content, &self.image_settings.in_) {
            (None, None) => Err(WkhtmltoxError::invalid(
                "an image document needs inline HTML or an 'in' source locator",
            )),
            (Some(_), Some(_)) => Err(WkhtmltoxError::invalid(
                "an image document sets both inline HTML and an 'in' source locator",
            )),
            _ => Ok(()),
        }
    }
}
