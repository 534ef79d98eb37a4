use chardetng::EncodingDetector;
use encoding_rs::Encoding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub html: String,
    pub encoding_label: String,
}

/// Decode raw page bytes into UTF-8: BOM -> Content-Type charset ->
/// chardetng fallback. Undecodable sequences become replacement characters
/// instead of failing the page; a marketplace card with a mangled glyph is
/// still worth parsing.
pub fn decode_page(bytes: &[u8], content_type: Option<&str>) -> DecodedPage {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(label) = content_type.and_then(extract_charset) {
        if let Some(enc) = Encoding::for_label(label.as_bytes()) {
            return decode_with(bytes, enc);
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let enc = detector.guess(None, true);
    decode_with(bytes, enc)
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.len() < 8 || !part[..8].eq_ignore_ascii_case("charset=") {
                return None;
            }
            Some(part[8..].trim_matches([' ', '"', '\''].as_ref()).to_string())
        })
        .next()
}

fn decode_with(bytes: &[u8], enc: &'static Encoding) -> DecodedPage {
    let (text, actual, had_errors) = enc.decode(bytes);
    if had_errors {
        log::warn!("lossy decode of page bytes as {}", actual.name());
    }
    DecodedPage {
        html: text.into_owned(),
        encoding_label: actual.name().to_string(),
    }
}
