use listado_core::{Country, RequestError, SearchRequest};
use url::Url;

/// Turns a browser-captured search URL into a [`SearchRequest`] that replays
/// it. Injectable so tests and alternative sources can supply their own.
pub trait UrlTranslator: Send + Sync {
    fn translate(&self, raw: &str) -> Result<SearchRequest, RequestError>;
}

/// Translator for `listado.{domain}` search URLs.
///
/// The country comes from the host, the keywords from the slug up to its
/// first filter token, and the URL itself is kept verbatim so the first page
/// matches exactly what the browser showed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListadoUrlTranslator;

impl UrlTranslator for ListadoUrlTranslator {
    fn translate(&self, raw: &str) -> Result<SearchRequest, RequestError> {
        let raw = raw.trim();
        let url = Url::parse(raw).map_err(|_| RequestError::UnsupportedUrl(raw.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestError::UnsupportedUrl(raw.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| RequestError::UnsupportedUrl(raw.to_string()))?;
        let domain = host
            .strip_prefix("listado.")
            .or_else(|| host.strip_prefix("www."))
            .unwrap_or(host);
        let country = Country::from_domain(domain)
            .ok_or_else(|| RequestError::UnsupportedUrl(raw.to_string()))?;

        let mut request = SearchRequest::with_keywords(slug_keywords(&url), country);
        request.search_url = Some(raw.to_string());
        request.validate()?;
        Ok(request)
    }
}

/// Keywords recovered from the slug: the first path segment up to its first
/// filter token, dashes split back into words.
fn slug_keywords(url: &Url) -> Vec<String> {
    let Some(segment) = url.path_segments().and_then(|mut parts| parts.next()) else {
        return Vec::new();
    };
    let slug = segment.split('_').next().unwrap_or(segment);
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(percent_decode)
        .collect()
}

fn percent_decode(word: &str) -> String {
    let mut out = Vec::with_capacity(word.len());
    let bytes = word.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() && word.is_char_boundary(i + 1) && word.is_char_boundary(i + 3) {
            if let Ok(byte) = u8::from_str_radix(&word[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use listado_core::{Country, RequestError};
    use pretty_assertions::assert_eq;

    use super::{ListadoUrlTranslator, UrlTranslator};

    #[test]
    fn browser_url_becomes_a_replayable_request() {
        let raw = "https://listado.mercadolibre.cl/notebook-gamer_Desde_49_NoIndex_True";
        let request = ListadoUrlTranslator.translate(raw).unwrap();
        assert_eq!(request.country, Country::Cl);
        assert_eq!(request.keywords, vec!["notebook", "gamer"]);
        assert_eq!(request.search_url.as_deref(), Some(raw));
    }

    #[test]
    fn percent_encoded_slugs_decode() {
        let raw = "https://listado.mercadolibre.com.ar/caf%C3%A9-molido";
        let request = ListadoUrlTranslator.translate(raw).unwrap();
        assert_eq!(request.keywords, vec!["café", "molido"]);
        assert_eq!(request.country, Country::Ar);
    }

    #[test]
    fn foreign_hosts_are_rejected() {
        let err = ListadoUrlTranslator
            .translate("https://example.com/notebook")
            .unwrap_err();
        assert!(matches!(err, RequestError::UnsupportedUrl(_)));
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let err = ListadoUrlTranslator
            .translate("ftp://listado.mercadolibre.cl/notebook")
            .unwrap_err();
        assert!(matches!(err, RequestError::UnsupportedUrl(_)));
    }

    #[test]
    fn bare_marketplace_domain_maps_too() {
        let raw = "https://listado.mercadolibre.com.mx/ssd-nvme_OrderId_PRICE";
        let request = ListadoUrlTranslator.translate(raw).unwrap();
        assert_eq!(request.country, Country::Mx);
        assert_eq!(request.keywords, vec!["ssd", "nvme"]);
    }
}
