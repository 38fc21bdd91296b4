// src/notify/render.rs
//! Message templates (Telegram HTML parse mode).

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::listing::{Listing, SourceTag};

/// Telegram limit for photo captions.
pub const CAPTION_LIMIT: usize = 1024;
/// Telegram limit for text messages.
pub const MESSAGE_LIMIT: usize = 4096;

const TITLE_MAX: usize = 200;
const DETAIL_MAX: usize = 300;

/// Caption for one listing, chosen by the listing's source.
pub fn listing_caption(l: &Listing) -> String {
    let full = match l.source {
        SourceTag::Imot => imot_caption(l, true),
        SourceTag::Address => address_caption(l),
        SourceTag::DomRia => generic_caption(l),
    };
    if full.chars().count() <= CAPTION_LIMIT {
        return full;
    }
    // Only free text can push us over; drop it rather than cut through tags.
    match l.source {
        SourceTag::Imot => imot_caption(l, false),
        _ => header(l) + &link_line(l),
    }
}

fn header(l: &Listing) -> String {
    format!(
        "<b>{}</b>\n<b>Price:</b> {}\n",
        encode_text(&truncate_chars(&l.title, TITLE_MAX)),
        encode_text(l.price.as_deref().unwrap_or("unknown"))
    )
}

fn link_line(l: &Listing) -> String {
    format!(
        "<a href=\"{}\">Open listing</a>",
        encode_double_quoted_attribute(l.link())
    )
}

fn imot_caption(l: &Listing, with_info: bool) -> String {
    let seller = l.detail("seller").filter(|s| !s.is_empty()).unwrap_or("Unknown");
    let mut out = header(l);
    out.push_str(&format!("<b>Seller:</b> {}\n", encode_text(seller)));
    if with_info {
        if let Some(info) = l.detail("info").filter(|s| !s.is_empty()) {
            out.push_str(&format!(
                "<b>Details:</b> <i>{}</i>\n",
                encode_text(&truncate_chars(info, DETAIL_MAX))
            ));
        }
    }
    out + &link_line(l)
}

fn address_caption(l: &Listing) -> String {
    let mut out = header(l);
    for (key, label) in [("type", "Type"), ("size", "Size")] {
        let v = l.detail(key).unwrap_or_default();
        out.push_str(&format!("<b>{label}:</b> {}\n", encode_text(v)));
    }
    out + &link_line(l)
}

fn generic_caption(l: &Listing) -> String {
    let mut out = header(l);
    for (k, v) in &l.details {
        if v.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "<b>{}:</b> {}\n",
            encode_text(k),
            encode_text(&truncate_chars(v, DETAIL_MAX))
        ));
    }
    out + &link_line(l)
}

/// Per-cycle status line, sent even when nothing is new.
pub fn cycle_summary(total: usize, new: usize) -> String {
    format!("Checked {total} listings, new: {new}")
}

pub fn source_error(source: &str, err: &anyhow::Error) -> String {
    let text = format!("Error while checking {source}: {err:#}");
    encode_text(&truncate_chars(&text, MESSAGE_LIMIT - 64)).into_owned()
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imot_caption_escapes_and_defaults_seller() {
        let l = Listing::new(SourceTag::Imot, "https://www.imot.bg/a?x=1&y=2", "2-room <new>")
            .with_price("650 EUR")
            .with_detail("info", "Sunny, 70 sq.m")
            .with_detail("seller", "");
        let c = listing_caption(&l);
        assert!(c.starts_with("<b>2-room &lt;new&gt;</b>\n<b>Price:</b> 650 EUR\n"));
        assert!(c.contains("<b>Seller:</b> Unknown"));
        assert!(c.contains("<i>Sunny, 70 sq.m</i>"));
        assert!(c.ends_with("<a href=\"https://www.imot.bg/a?x=1&amp;y=2\">Open listing</a>"));
    }

    #[test]
    fn address_caption_lists_type_and_size() {
        let l = Listing::new(SourceTag::Address, "https://address.bg/1", "Flat")
            .with_price("900 €")
            .with_detail("size", "85 m2")
            .with_detail("type", "2-bedroom");
        let c = listing_caption(&l);
        assert!(c.contains("<b>Type:</b> 2-bedroom\n<b>Size:</b> 85 m2\n"));
    }

    #[test]
    fn long_details_stay_within_caption_limit() {
        let l = Listing::new(SourceTag::DomRia, "https://dom.ria.com/x", "t".repeat(5000))
            .with_price("1")
            .with_detail("a", "<".repeat(900))
            .with_detail("b", "<".repeat(900));
        assert!(listing_caption(&l).chars().count() <= CAPTION_LIMIT);
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate_chars("abcdef", 4), "abc…");
        assert_eq!(truncate_chars("abc", 4), "abc");
    }
}
