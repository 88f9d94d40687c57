//! services/template_renderer.rs
//! Sustitución de `{{Variable}}`, conversión a HTML sanitizado y texto plano.
//! Todo es puro: mismas entradas, misma salida.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::models::template_model::{RenderedMessage, Template};

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid token regex"))
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

fn br_regex() -> &'static Regex {
    static BR: OnceLock<Regex> = OnceLock::new();
    BR.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").expect("valid br regex"))
}

/// Reemplaza cada token por su valor; las variables desconocidas quedan vacías.
pub fn substitute(input: &str, variables: &BTreeMap<String, String>) -> String {
    token_regex()
        .replace_all(input, |caps: &Captures| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Sanitiza con el subconjunto seguro de ammonia (sin scripts ni handlers `on*`).
pub fn sanitize_html(html: &str) -> String {
    ammonia::clean(html)
}

/// Texto plano a partir de HTML ya sanitizado.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = br_regex().replace_all(html, "\n");
    let stripped = tag_regex().replace_all(&with_breaks, "");
    decode_entities(&stripped)
}

fn decode_entities(input: &str) -> String {
    // &amp; al final para no decodificar dos veces
    input
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

pub fn render(template: &Template, variables: &BTreeMap<String, String>) -> RenderedMessage {
    render_parts(&template.subject, &template.body, variables)
}

pub fn render_parts(
    subject: &str,
    body: &str,
    variables: &BTreeMap<String, String>,
) -> RenderedMessage {
    let subject = substitute(subject, variables);
    let body = substitute(body, variables);
    let with_breaks = body.replace("\r\n", "\n").replace('\n', "<br/>");
    let html = sanitize_html(&with_breaks);
    let text = html_to_text(&html);

    RenderedMessage {
        subject,
        html,
        text,
    }
}
