//! services/tracking.rs
//! Instrumentación de tracking: links envueltos en el redirect de clicks
//! y un pixel 1x1 para aperturas.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// GIF transparente 1x1 en base64
pub const TRANSPARENT_GIF_BASE64: &str = "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

fn anchor_href_regex() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| {
        Regex::new(r#"(?i)(<a\b[^>]*?\bhref\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
            .expect("valid href regex")
    })
}

pub fn click_base(base_url: &str) -> String {
    format!("{}/api/track/click/", base_url.trim_end_matches('/'))
}

pub fn click_url(base_url: &str, tracking_id: &str, target: &str) -> String {
    format!(
        "{}{}?url={}",
        click_base(base_url),
        tracking_id,
        urlencoding::encode(target)
    )
}

/// URL del pixel. Sin tracking id se degrada a un GIF transparente estático.
pub fn pixel_url(base_url: &str, tracking_id: Option<&str>) -> String {
    match tracking_id {
        Some(tid) => format!(
            "{}/api/track/open/{}.gif",
            base_url.trim_end_matches('/'),
            tid
        ),
        None => format!("data:image/gif;base64,{TRANSPARENT_GIF_BASE64}"),
    }
}

fn beacon_tag(pixel: &str) -> String {
    format!(r#"<img src="{pixel}" width="1" height="1" alt="" style="display:none"/>"#)
}

/// Envuelve cada `<a href>` y agrega el beacon una sola vez.
/// Sin tracking id devuelve el HTML sin cambios (previews).
pub fn instrument(html: &str, tracking_id: Option<&str>, base_url: &str) -> String {
    let Some(tid) = tracking_id else {
        return html.to_string();
    };

    let already_wrapped = click_base(base_url);
    let rewritten = anchor_href_regex().replace_all(html, |caps: &Captures| {
        let prefix = &caps[1];
        let original = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        if original.starts_with(&already_wrapped) {
            return caps[0].to_string();
        }
        // el HTML sanitizado trae `&amp;` dentro de los atributos
        let target = original.replace("&amp;", "&");
        format!(r#"{prefix}"{}""#, click_url(base_url, tid, &target))
    });

    let pixel = pixel_url(base_url, Some(tid));
    if rewritten.contains(&pixel) {
        return rewritten.into_owned();
    }
    format!("{}{}", rewritten, beacon_tag(&pixel))
}

/// true si el HTML instrumentado contiene un link envuelto hacia `target`
/// para ese tracking id.
pub fn links_to(html: &str, tracking_id: &str, target: &str) -> bool {
    let wrapped = format!(
        "/api/track/click/{}?url={}",
        tracking_id,
        urlencoding::encode(target)
    );
    html.contains(&wrapped)
}

/// Extrae el tracking id de un segmento `xxxx.gif`
pub fn tracking_id_from_pixel(segment: &str) -> &str {
    segment.strip_suffix(".gif").unwrap_or(segment)
}
