//! HTML pages rendered by the authorization endpoint.
//!
//! Every interpolated value goes through [`escape`]; pages never carry token values.

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::_prelude::*;

/// Escapes text for use inside HTML element content and double-quoted attributes.
pub fn escape(raw: &str) -> String {
	let mut escaped = String::with_capacity(raw.len());

	for c in raw.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#x27;"),
			c => escaped.push(c),
		}
	}

	escaped
}

/// Landing page linking to the brokerage consent dialog.
pub fn authorize(url: &Url, expires_at: OffsetDateTime) -> String {
	let body = format!(
		"<p>Sign in to the brokerage to let the market monitor fetch quotes.</p>\n\
		 <p><a class=\"button\" href=\"{href}\">Authorize access</a></p>\n\
		 <p class=\"muted\">This link stays valid until {expires}.</p>",
		href = escape(url.as_str()),
		expires = escape(&instant(expires_at)),
	);

	layout("Authorize market monitor", &body)
}

/// Confirmation shown after a successful code exchange.
pub fn success(expires_at: OffsetDateTime) -> String {
	let body = format!(
		"<p>Authorization complete. The monitor will use the new access token until {}.</p>\n\
		 <p class=\"muted\">You can close this window.</p>",
		escape(&instant(expires_at)),
	);

	layout("Authorized", &body)
}

/// Failure page; `detail` must already be free of secrets.
pub fn failure(title: &str, detail: &str) -> String {
	let body = format!(
		"<p>{}</p>\n<p class=\"muted\">Open <a href=\"/auth\">/auth</a> to start over.</p>",
		escape(detail),
	);

	layout(title, &body)
}

fn layout(title: &str, body: &str) -> String {
	format!(
		"<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
		 <title>{title}</title>\n<style>\n\
		 body {{ font-family: sans-serif; max-width: 36rem; margin: 4rem auto; }}\n\
		 .button {{ padding: 0.6rem 1.2rem; background: #5a2ca0; color: #fff; \
		 text-decoration: none; border-radius: 4px; }}\n\
		 .muted {{ color: #666; }}\n</style>\n</head>\n<body>\n<h1>{title}</h1>\n{body}\n\
		 </body>\n</html>\n",
		title = escape(title),
	)
}

fn instant(at: OffsetDateTime) -> String {
	at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}
