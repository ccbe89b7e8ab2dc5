//! # PDF Watermarking
//!
//! Stamps a buyer-identifying mark on every page of a PDF.
//!
//! ## Page Layout
//! ```text
//! ┌─────────────────────────────┐
//! │ name <email>   name <email> │  ◄── corner marks, 8pt × scale
//! │                      ⟋      │
//! │                 ⟋           │
//! │            ⟋                │  ◄── centre mark along the diagonal,
//! │       ⟋                     │      42pt × scale, 18% grey
//! │  ⟋                          │
//! │ name <email>   name <email> │
//! └─────────────────────────────┘
//! ```
//!
//! Geometry comes from `folio_core::watermark`; this module only edits the
//! PDF object graph. The original content of each page is wrapped in
//! `q … Q` so its graphics state cannot leak into the mark, and the page's
//! resources are copied before the mark font is added, since resource
//! dictionaries are often shared between pages.
//!
//! Everything here is synchronous and CPU bound. Async callers run it on
//! the blocking pool.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::iter;
use tracing::debug;

use folio_core::watermark::{layout, PageBox, PageLayout};

/// Watermarking errors.
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("Source is not a readable PDF: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("Encrypted PDFs cannot be watermarked")]
    Encrypted,

    #[error("PDF has no pages")]
    NoPages,

    #[error("Staging the watermarked file failed: {0}")]
    Io(#[from] std::io::Error),
}

const FONT_NAME: &[u8] = b"FolioMark";
const STATE_NAME: &[u8] = b"FolioMarkGs";

/// Fill grey level for the marks.
const MARK_GRAY: f32 = 0.5;

// Guards against Parent cycles in damaged files
const MAX_TREE_DEPTH: usize = 32;

/// Returns a copy of `source` with `text` stamped on every page.
pub fn watermark(source: &[u8], text: &str) -> Result<Vec<u8>, WatermarkError> {
    let mut doc = Document::load_mem(source)?;

    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(WatermarkError::Encrypted);
    }

    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(WatermarkError::NoPages);
    }

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    for page_id in &pages {
        let page_box = media_box(&doc, *page_id);
        let marks = layout(&page_box, text);

        let state_id = doc.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => marks.opacity,
            "CA" => marks.opacity,
        });

        let mut resources = match inherited(&doc, *page_id, b"Resources") {
            Some(Object::Dictionary(dict)) => dict,
            _ => Dictionary::new(),
        };
        add_resource(&doc, &mut resources, b"Font", FONT_NAME, font_id);
        add_resource(&doc, &mut resources, b"ExtGState", STATE_NAME, state_id);

        let open = Content {
            operations: vec![Operation::new("q", vec![])],
        };
        let mut close = vec![Operation::new("Q", vec![])];
        close.extend(mark_operations(&marks, text));
        let close = Content { operations: close };

        let open_id = doc.add_object(Stream::new(dictionary! {}, open.encode()?));
        let close_id = doc.add_object(Stream::new(dictionary! {}, close.encode()?));

        let mut contents = vec![Object::Reference(open_id)];
        contents.extend(existing_contents(&doc, *page_id));
        contents.push(Object::Reference(close_id));

        let page = doc.get_object_mut(*page_id)?.as_dict_mut()?;
        page.set("Contents", Object::Array(contents));
        page.set("Resources", Object::Dictionary(resources));
    }

    let mut out = Vec::with_capacity(source.len() + 4096);
    doc.save_to(&mut out)?;

    debug!(pages = pages.len(), input = source.len(), output = out.len(), "PDF watermarked");
    Ok(out)
}

/// Text operators for the centre mark followed by the four corner marks.
fn mark_operations(marks: &PageLayout, text: &str) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(STATE_NAME.to_vec())]),
        Operation::new("g", vec![MARK_GRAY.into()]),
        Operation::new("BT", vec![]),
    ];

    for placement in iter::once(&marks.center).chain(&marks.corners) {
        ops.push(Operation::new(
            "Tf",
            vec![Object::Name(FONT_NAME.to_vec()), placement.font_size.into()],
        ));
        ops.push(Operation::new(
            "Tm",
            placement.matrix.iter().map(|v| Object::from(*v)).collect(),
        ));
        ops.push(Operation::new("Tj", vec![Object::string_literal(text)]));
    }

    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Looks up a page attribute, following the `Parent` chain for inherited ones.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);

    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc.get_dictionary(current?).ok()?;

        if let Ok(value) = dict.get(key) {
            return doc.dereference(value).ok().map(|(_, obj)| obj.clone());
        }

        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> PageBox {
    let values = inherited(doc, page_id, b"MediaBox").and_then(|obj| {
        let items = obj.as_array().ok()?;
        let numbers: Vec<f32> = items.iter().filter_map(number).collect();
        <[f32; 4]>::try_from(numbers).ok()
    });

    match values.map(PageBox::from_media_box) {
        Some(page_box) if page_box.is_usable() => page_box,
        _ => PageBox::a4(),
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Adds `name → id` under a resource category, copying the category first.
fn add_resource(doc: &Document, resources: &mut Dictionary, category: &[u8], name: &[u8], id: ObjectId) {
    let mut entries = resources
        .get(category)
        .ok()
        .and_then(|obj| doc.dereference(obj).ok())
        .and_then(|(_, obj)| obj.as_dict().ok().cloned())
        .unwrap_or_default();

    entries.set(name.to_vec(), Object::Reference(id));
    resources.set(category.to_vec(), Object::Dictionary(entries));
}

/// The page's content streams, flattened to a list of references.
fn existing_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-page PDF: page 1 inherits an A4 MediaBox, page 2 carries its own
    /// A3 box with a shifted origin.
    pub(crate) fn sample_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let body = Content {
            operations: vec![
                Operation::new("re", vec![10.into(), 10.into(), 50.into(), 50.into()]),
                Operation::new("f", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, body.encode().unwrap()));

        let first = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let second = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => vec![Object::Reference(content_id)],
            "MediaBox" => vec![100.into(), 100.into(), 942.into(), 1291.into()],
        });

        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![first.into(), second.into()],
            "Count" => 2,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn page_operations(doc: &Document, page_id: ObjectId) -> Vec<Operation> {
        Content::decode(&doc.get_page_content(page_id).unwrap())
            .unwrap()
            .operations
    }

    fn center_font_size(ops: &[Operation]) -> f32 {
        ops.iter()
            .find(|op| op.operator == "Tf")
            .and_then(|op| number(&op.operands[1]))
            .unwrap()
    }

    #[test]
    fn test_every_page_is_marked() {
        let text = "Ada Lovelace <ada@example.com>";
        let marked = watermark(&sample_pdf(), text).unwrap();
        let doc = Document::load_mem(&marked).unwrap();

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        assert_eq!(pages.len(), 2);

        for page_id in &pages {
            let ops = page_operations(&doc, *page_id);

            // original content is wrapped
            assert_eq!(ops.first().unwrap().operator, "q");
            assert!(ops.iter().any(|op| op.operator == "re"));

            let stamped: Vec<&Operation> = ops.iter().filter(|op| op.operator == "Tj").collect();
            assert_eq!(stamped.len(), 5);
            for op in stamped {
                assert_eq!(op.operands[0].as_str().unwrap(), text.as_bytes());
            }

            let resources = doc.get_dictionary(*page_id).unwrap().get(b"Resources").unwrap();
            let fonts = resources.as_dict().unwrap().get(b"Font").unwrap().as_dict().unwrap();
            assert!(fonts.has(FONT_NAME));
        }
    }

    #[test]
    fn test_marks_scale_with_the_page() {
        let marked = watermark(&sample_pdf(), "someone <s@example.com>").unwrap();
        let doc = Document::load_mem(&marked).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();

        let small = center_font_size(&page_operations(&doc, pages[0]));
        let large = center_font_size(&page_operations(&doc, pages[1]));
        assert!(large > small, "{large} should exceed {small}");
    }

    #[test]
    fn test_media_box_is_inherited() {
        let doc = Document::load_mem(&sample_pdf()).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();

        let first = media_box(&doc, pages[0]);
        assert_eq!((first.width(), first.height()), (595.0, 842.0));

        let second = media_box(&doc, pages[1]);
        assert_eq!((second.x0, second.y0), (100.0, 100.0));
        assert_eq!((second.width(), second.height()), (842.0, 1191.0));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(watermark(b"not a pdf", "x"), Err(WatermarkError::Parse(_))));
    }
}
