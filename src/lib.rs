//! Window-view duplication for XLSX packages.
//!
//! This crate intentionally operates at the ZIP/Open Packaging Convention layer
//! and edits the two affected parts as raw text: Excel's own XML reader rejects
//! semantically-equivalent but differently-serialized parts, so the safe edit is
//! a textual splice of the existing `<workbookView .../>` / `<sheetView .../>`
//! elements rather than a parse-and-reserialize of the whole part.
//!
//! Every other part of the package round-trips byte-for-byte.

pub mod cli;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Part holding the workbook-level saved views (`<workbookView>` elements).
pub const WORKBOOK_PART: &str = "xl/workbook.xml";

/// Part holding the first worksheet's per-window view settings.
///
/// Only the first sheet is edited; multi-sheet behavior beyond that is
/// deliberately out of scope.
pub const FIRST_SHEET_PART: &str = "xl/worksheets/sheet1.xml";

/// An XLSX package held fully in memory as a part map (name → bytes).
///
/// Part names are normalized (leading `/` stripped, `\` converted to `/`, and
/// `.`/`..` segments resolved) so the fixed lookups below behave the same for
/// archives produced by sloppy zippers.
pub struct WorkbookPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl WorkbookPackage {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open workbook {}", path.display()))?;
        let mut zip = ZipArchive::new(file).context("parse zip archive")?;
        Self::read_zip(&mut zip)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cursor = Cursor::new(bytes);
        let mut zip = ZipArchive::new(cursor).context("parse zip archive")?;
        Self::read_zip(&mut zip)
    }

    fn read_zip<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<Self> {
        let mut parts = BTreeMap::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("read zip entry")?;
            if file.is_dir() {
                continue;
            }
            let name = normalize_part_name(file.name());
            // Do not trust `ZipFile::size()` for allocation; ZIP metadata is untrusted and can
            // advertise enormous uncompressed sizes (zip-bomb style OOM).
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .with_context(|| format!("read part {name}"))?;
            if parts.insert(name.clone(), buf).is_some() {
                return Err(anyhow!(
                    "duplicate part name after normalization (possible invalid zip): {name}"
                ));
            }
        }

        Ok(Self { parts })
    }

    pub fn part_names(&self) -> BTreeSet<&str> {
        self.parts.keys().map(|k| k.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(|v| v.as_slice())
    }

    /// Fetch a part and decode it as UTF-8 text.
    pub fn part_text(&self, name: &str) -> Result<String> {
        let bytes = self
            .get(name)
            .ok_or_else(|| anyhow!("package has no part {name}"))?;
        String::from_utf8(bytes.to_vec()).with_context(|| format!("decode part {name} as UTF-8"))
    }

    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.parts.insert(normalize_part_name(&name.into()), bytes);
    }

    /// Write every part to `path`, overwriting an existing file.
    ///
    /// A failure mid-write leaves whatever was flushed so far on disk; there is
    /// no atomic rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("create workbook {}", path.display()))?;
        self.write_zip(file)?;
        Ok(())
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>> {
        let cursor = Cursor::new(Vec::new());
        Ok(self.write_zip(cursor)?.into_inner())
    }

    fn write_zip<W: Write + Seek>(&self, writer: W) -> Result<W> {
        let mut zip = ZipWriter::new(writer);
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("write zip entry header for {name}"))?;
            zip.write_all(bytes)
                .with_context(|| format!("write part {name}"))?;
        }

        zip.finish().context("finalize zip archive")
    }
}

fn normalize_part_name(part_name: &str) -> String {
    let normalized = part_name.trim_start_matches('/').replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            _ => out.push(segment),
        }
    }
    out.join("/")
}

/// A located element span within a part's text.
///
/// `text` includes both markers; `end_offset` points just past the end marker,
/// i.e. at the splice point for duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub text: &'a str,
    pub end_offset: usize,
}

/// Which quote character delimits an attribute value in the source text.
///
/// Exactly one style is used per file; synthesized attributes must reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    Double,
    Single,
}

impl QuoteStyle {
    pub fn as_char(self) -> char {
        match self {
            QuoteStyle::Double => '"',
            QuoteStyle::Single => '\'',
        }
    }
}

/// Locate the first `start_marker`..`end_marker` span in `text`.
///
/// Returns `Ok(None)` when `start_marker` does not occur, so callers can fall
/// back to an alternate marker. A found start marker with no end marker after
/// it is an error: the element is malformed and nothing downstream can splice
/// safely. The end-marker search begins strictly after the start marker's own
/// text.
pub fn locate_fragment<'a>(
    text: &'a str,
    start_marker: &str,
    end_marker: &str,
) -> Result<Option<Fragment<'a>>> {
    let Some(start) = text.find(start_marker) else {
        return Ok(None);
    };
    let search_from = start + start_marker.len();
    let end_rel = text[search_from..].find(end_marker).ok_or_else(|| {
        anyhow!("found {start_marker} but no closing {end_marker} after it")
    })?;
    let end = search_from + end_rel + end_marker.len();
    Ok(Some(Fragment {
        text: &text[start..end],
        end_offset: end,
    }))
}

fn locate_required<'a>(
    text: &'a str,
    start_marker: &str,
    end_marker: &str,
) -> Result<Fragment<'a>> {
    locate_fragment(text, start_marker, end_marker)?
        .ok_or_else(|| anyhow!("could not find {start_marker} element"))
}

/// The original quoted attribute text (`name="value"` including quotes) plus
/// the quote style it uses.
#[derive(Debug, Clone, Copy)]
struct QuotedAttr<'a> {
    text: &'a str,
    quote: QuoteStyle,
}

/// Find `name="..."` within an element fragment, trying the double-quote form
/// first and falling back to single quotes. Missing in both forms is fatal.
fn locate_quoted_attr<'a>(element: &'a str, name: &str) -> Result<QuotedAttr<'a>> {
    for quote in [QuoteStyle::Double, QuoteStyle::Single] {
        let q = quote.as_char();
        let start_marker = format!("{name}={q}");
        let end_marker = q.to_string();
        if let Some(found) = locate_fragment(element, &start_marker, &end_marker)? {
            return Ok(QuotedAttr {
                text: found.text,
                quote,
            });
        }
    }
    Err(anyhow!(
        "could not find {name} attribute (tried double and single quotes)"
    ))
}

/// Locate one self-closing view element, then splice `num_windows` copies of it
/// immediately after the original, each copy carrying `attr_name` rewritten to
/// `new_value(n)` in the source's quote style. Copies land back-to-back in
/// increasing `n` order; the original stays first and untouched.
fn duplicate_view_element(
    xml: &str,
    start_marker: &str,
    attr_name: &str,
    num_windows: u32,
    mut new_value: impl FnMut(u32) -> String,
) -> Result<String> {
    let view = locate_required(xml, start_marker, "/>")?;
    let attr = locate_quoted_attr(view.text, attr_name)?;
    let q = attr.quote.as_char();

    let mut out = String::with_capacity(xml.len() + view.text.len() * num_windows as usize);
    out.push_str(xml);
    let mut insert_at = view.end_offset;
    for n in 0..num_windows {
        let replacement = format!("{attr_name}={q}{}{q}", new_value(n));
        // Replace every occurrence of the original quoted attribute within the
        // element, not just the first.
        let copy = view.text.replace(attr.text, &replacement);
        out.insert_str(insert_at, &copy);
        insert_at += copy.len();
    }
    Ok(out)
}

/// Duplicate the `<workbookView .../>` element `num_windows` times, each copy
/// with a freshly generated braced uppercase GUID in its `uid` attribute.
pub fn add_workbook_views(xml: &str, num_windows: u32) -> Result<String> {
    duplicate_view_element(xml, "<workbookView", "uid", num_windows, |_| {
        new_view_guid()
    })
}

/// Duplicate the `<sheetView .../>` element `num_windows` times; copy `n`
/// (0-based) points at workbook view `n + 1`, so indices run 1..=N while the
/// original element keeps its own index (typically 0).
///
/// The trailing space in the start marker is load-bearing: it keeps longer tag
/// names such as `<sheetViewPr>` from matching.
pub fn add_sheet_views(xml: &str, num_windows: u32) -> Result<String> {
    duplicate_view_element(xml, "<sheetView ", "workbookViewId", num_windows, |n| {
        (n + 1).to_string()
    })
}

/// A fresh `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}` token, uppercase hex,
/// matching the format Excel writes for `uid` attributes.
pub fn new_view_guid() -> String {
    format!(
        "{{{}}}",
        Uuid::new_v4().hyphenated().to_string().to_ascii_uppercase()
    )
}

/// Apply the whole transform to an opened package: duplicate the workbook view
/// in [`WORKBOOK_PART`], then the sheet view in [`FIRST_SHEET_PART`].
///
/// `num_windows == 0` rewrites both parts with zero insertions (a textual
/// no-op). The transform is not idempotent by design: a second run duplicates
/// whatever it finds first, previously inserted copies included.
pub fn add_windows(package: &mut WorkbookPackage, num_windows: u32) -> Result<()> {
    let workbook = package.part_text(WORKBOOK_PART)?;
    let edited = add_workbook_views(&workbook, num_windows)
        .with_context(|| format!("duplicate workbook views in {WORKBOOK_PART}"))?;
    package.set_part(WORKBOOK_PART, edited.into_bytes());

    let sheet = package.part_text(FIRST_SHEET_PART)?;
    let edited = add_sheet_views(&sheet, num_windows)
        .with_context(|| format!("duplicate sheet views in {FIRST_SHEET_PART}"))?;
    package.set_part(FIRST_SHEET_PART, edited.into_bytes());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_fragment_returns_span_and_end_offset() {
        let text = r#"<a><workbookView x="1"/><b/></a>"#;
        let found = locate_fragment(text, "<workbookView", "/>")
            .unwrap()
            .unwrap();
        assert_eq!(found.text, r#"<workbookView x="1"/>"#);
        assert_eq!(&text[found.end_offset..], "<b/></a>");
    }

    #[test]
    fn locate_fragment_missing_start_is_none() {
        let found = locate_fragment("<sheetData/>", "<workbookView", "/>").unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn locate_fragment_end_search_starts_after_start_marker() {
        // The end marker must not be matched inside the start marker itself.
        let text = "aXa";
        let found = locate_fragment(text, "aX", "a").unwrap().unwrap();
        assert_eq!(found.text, "aXa");
        assert_eq!(found.end_offset, 3);
    }

    #[test]
    fn locate_fragment_unterminated_element_is_an_error() {
        let err = locate_fragment(r#"<workbookView x="1""#, "<workbookView", "/>").unwrap_err();
        assert!(err.to_string().contains("/>"), "{err}");
    }

    #[test]
    fn quoted_attr_prefers_double_quotes_then_falls_back() {
        let double = locate_quoted_attr(r#"<v uid="{A}"/>"#, "uid").unwrap();
        assert_eq!(double.text, r#"uid="{A}""#);
        assert_eq!(double.quote, QuoteStyle::Double);

        let single = locate_quoted_attr(r#"<v uid='{A}'/>"#, "uid").unwrap();
        assert_eq!(single.text, "uid='{A}'");
        assert_eq!(single.quote, QuoteStyle::Single);

        let err = locate_quoted_attr("<v/>", "uid").unwrap_err();
        assert!(err.to_string().contains("uid"), "{err}");
    }

    #[test]
    fn new_view_guid_is_braced_uppercase() {
        let guid = new_view_guid();
        assert_eq!(guid.len(), 38);
        assert!(guid.starts_with('{') && guid.ends_with('}'));
        let inner = &guid[1..guid.len() - 1];
        assert!(inner
            .chars()
            .all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(inner.matches('-').count(), 4);
    }

    #[test]
    fn normalize_part_name_resolves_separators_and_dots() {
        assert_eq!(normalize_part_name("/xl/workbook.xml"), "xl/workbook.xml");
        assert_eq!(
            normalize_part_name("xl\\worksheets\\sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(normalize_part_name("xl/./a/../workbook.xml"), "xl/workbook.xml");
    }
}
