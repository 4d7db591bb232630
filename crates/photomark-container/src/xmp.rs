//! Targeted edits to XMP packets.
//!
//! The packets are rewritten with narrow textual substitutions rather than
//! a full RDF parser: vendor XMP from phone cameras is not reliably valid
//! XML, and gallery apps match these attributes byte-wise, so preserving
//! the untouched remainder of the packet matters more than canonical
//! serialization.

use photomark_core::WatermarkError;
use regex::Regex;

fn attr_regex(name: &str) -> Result<Regex, WatermarkError> {
    Regex::new(&format!(r#"{}\s*=\s*"([^"]*)""#, regex::escape(name)))
        .map_err(|e| WatermarkError::unexpected(format!("attribute regex: {e}")))
}

/// Value of the first `name="..."` attribute occurrence, if present.
pub fn read_attribute(xml: &str, name: &str) -> Result<Option<String>, WatermarkError> {
    let re = attr_regex(name)?;
    Ok(re
        .captures(xml)
        .map(|c| c.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()))
}

/// Rewrite every `name="..."` occurrence to carry `value`. Returns the
/// packet unchanged when the attribute is absent.
pub fn update_attribute(xml: &str, name: &str, value: &str) -> Result<String, WatermarkError> {
    let re = attr_regex(name)?;
    let replacement = format!(r#"{}="{}""#, name, value);
    Ok(re.replace_all(xml, replacement.as_str()).into_owned())
}

/// Update `name` inside a single tag, inserting the attribute before the
/// closing bracket when it is not already present.
fn set_tag_attribute(tag: &str, name: &str, value: &str) -> Result<String, WatermarkError> {
    if read_attribute(tag, name)?.is_some() {
        return update_attribute(tag, name, value);
    }
    let insert_at = if let Some(p) = tag.rfind("/>") {
        p
    } else if let Some(p) = tag.rfind('>') {
        p
    } else {
        return Ok(tag.to_string());
    };
    let mut out = String::with_capacity(tag.len() + name.len() + value.len() + 4);
    out.push_str(tag[..insert_at].trim_end());
    out.push_str(&format!(r#" {}="{}""#, name, value));
    out.push_str(&tag[insert_at..]);
    Ok(out)
}

/// One `Container:Item` entry of a GContainer directory, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerItem {
    pub semantic: String,
    pub mime: Option<String>,
    pub length: u64,
    pub padding: u64,
    pub uri: Option<String>,
}

impl ContainerItem {
    pub fn is_primary(&self) -> bool {
        self.semantic.eq_ignore_ascii_case("Primary")
    }
}

fn item_regex() -> Result<Regex, WatermarkError> {
    Regex::new(r"<Container:Item\b[^>]*>")
        .map_err(|e| WatermarkError::unexpected(format!("container item regex: {e}")))
}

/// Parse the GContainer directory items from an XMP packet.
///
/// Only the self-closing attribute form emitted by Google's libraries is
/// recognized; only `Item:Semantic`, `Item:Mime`, `Item:Length`,
/// `Item:Padding` and `Item:URI` are read.
pub fn parse_container_items(xml: &str) -> Result<Vec<ContainerItem>, WatermarkError> {
    let item_re = item_regex()?;
    let mut items = Vec::new();
    for m in item_re.find_iter(xml) {
        let tag = m.as_str();
        let semantic = match read_attribute(tag, "Item:Semantic")? {
            Some(s) => s,
            None => continue,
        };
        let length = read_attribute(tag, "Item:Length")?
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let padding = read_attribute(tag, "Item:Padding")?
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        items.push(ContainerItem {
            semantic,
            mime: read_attribute(tag, "Item:Mime")?,
            length,
            padding,
            uri: read_attribute(tag, "Item:URI")?,
        });
    }
    Ok(items)
}

/// Bytes the directory claims follow the primary image: the sum of length
/// plus padding over every non-primary item, in document order.
pub fn trailing_length(items: &[ContainerItem]) -> u64 {
    items
        .iter()
        .filter(|item| !item.is_primary())
        .map(|item| item.length + item.padding)
        .sum()
}

fn edit_items_with(
    xml: &str,
    semantic: &str,
    edit: impl Fn(&str) -> Result<String, WatermarkError>,
) -> Result<String, WatermarkError> {
    let item_re = item_regex()?;
    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0usize;
    for m in item_re.find_iter(xml) {
        out.push_str(&xml[cursor..m.start()]);
        let tag = m.as_str();
        let matches = read_attribute(tag, "Item:Semantic")?
            .map(|s| s.eq_ignore_ascii_case(semantic))
            .unwrap_or(false);
        if matches {
            out.push_str(&edit(tag)?);
        } else {
            out.push_str(tag);
        }
        cursor = m.end();
    }
    out.push_str(&xml[cursor..]);
    Ok(out)
}

/// Set `Item:Length` on the directory item with the given semantic and zero
/// its `Item:Padding`, inserting either attribute when missing. Other items
/// keep their bytes.
pub fn update_item_length(
    xml: &str,
    semantic: &str,
    new_length: u64,
) -> Result<String, WatermarkError> {
    edit_items_with(xml, semantic, |tag| {
        let tag = set_tag_attribute(tag, "Item:Length", &new_length.to_string())?;
        set_tag_attribute(&tag, "Item:Padding", "0")
    })
}

/// Zero `Item:Padding` on the item with the given semantic, leaving its
/// length alone. No-op when the attribute is absent.
pub fn zero_item_padding(xml: &str, semantic: &str) -> Result<String, WatermarkError> {
    edit_items_with(xml, semantic, |tag| {
        update_attribute(tag, "Item:Padding", "0")
    })
}

/// Gain-map recovery curve metadata, log2 stops relative to SDR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMapParams {
    pub min_log2: f64,
    pub max_log2: f64,
    pub gamma: f64,
}

impl Default for GainMapParams {
    fn default() -> Self {
        GainMapParams {
            min_log2: 0.0,
            max_log2: 0.0,
            gamma: 1.0,
        }
    }
}

/// Read `hdrgm:GainMapMin`, `hdrgm:GainMapMax` and `hdrgm:Gamma` from a
/// gain-map XMP packet; missing or unparsable attributes keep the defaults
/// (0, 0, 1).
pub fn parse_gain_map_params(xml: &str) -> Result<GainMapParams, WatermarkError> {
    let mut params = GainMapParams::default();
    if let Some(v) = read_attribute(xml, "hdrgm:GainMapMin")? {
        if let Ok(v) = v.trim().parse::<f64>() {
            params.min_log2 = v;
        }
    }
    if let Some(v) = read_attribute(xml, "hdrgm:GainMapMax")? {
        if let Ok(v) = v.trim().parse::<f64>() {
            params.max_log2 = v;
        }
    }
    if let Some(v) = read_attribute(xml, "hdrgm:Gamma")? {
        if let Ok(v) = v.trim().parse::<f64>() {
            params.gamma = v;
        }
    }
    Ok(params)
}

/// Encoded 8-bit value a gain-map pixel must carry to apply no boost.
///
/// The recovery curve stores a normalized log recovery in `[0, 1]` with
/// `0 = GainMapMin` and `1 = GainMapMax`; "no boost" is a log2 gain of 0,
/// which sits at `(0 - min) / (max - min)` before gamma encoding. A
/// degenerate range encodes to 0 and a non-positive gamma is treated as
/// linear.
pub fn neutral_gain_value(params: &GainMapParams) -> u8 {
    if params.max_log2 == params.min_log2 {
        return 0;
    }
    let gamma = if params.gamma > 0.0 { params.gamma } else { 1.0 };
    let log_recovery =
        ((0.0 - params.min_log2) / (params.max_log2 - params.min_log2)).clamp(0.0, 1.0);
    (log_recovery.powf(gamma) * 255.0).round() as u8
}
