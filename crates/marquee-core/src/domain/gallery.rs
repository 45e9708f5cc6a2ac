//! Gallery page: an HTML index with one `<figure>` per timestamped copy.
//!
//! New figures go right before `</body>`, so the page reads oldest first.

const SKELETON: &str = "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Gallery</title>\n</head>\n<body>\n</body>\n</html>\n";

/// Caption used when an upload carries no label.
pub const DEFAULT_CAPTION: &str = "Uploaded image";

pub fn figure(src: &str, caption: &str) -> String {
    let src = escape(src);
    let caption = escape(caption);
    format!("<figure><img src=\"{src}\" alt=\"{caption}\"><figcaption>{caption}</figcaption></figure>")
}

/// `page` is the current document; `None` starts a fresh one.
pub fn append_figure(page: Option<&str>, src: &str, caption: &str) -> String {
    let page = page.unwrap_or(SKELETON);
    let entry = figure(src, caption);
    match page.rfind("</body>") {
        Some(at) => format!("{}{entry}\n{}", &page[..at], &page[at..]),
        None => {
            let mut page = page.to_string();
            if !page.is_empty() && !page.ends_with('\n') {
                page.push('\n');
            }
            page.push_str(&entry);
            page.push('\n');
            page
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_page_gets_a_skeleton() {
        let page = append_figure(None, "uploads/a.png", "Spring");
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains(
            "<figure><img src=\"uploads/a.png\" alt=\"Spring\"><figcaption>Spring</figcaption></figure>\n</body>"
        ));
    }

    #[test]
    fn figures_are_appended_in_order() {
        let page = append_figure(None, "a.png", "first");
        let page = append_figure(Some(&page), "b.png", "second");
        assert!(page.find("a.png").unwrap() < page.find("b.png").unwrap());
        assert_eq!(page.matches("</body>").count(), 1);
    }

    #[test]
    fn caption_is_escaped() {
        let entry = figure("a.png", "<b>\"sale\" & more</b>");
        assert!(entry.contains("alt=\"&lt;b&gt;&quot;sale&quot; &amp; more&lt;/b&gt;\""));
        assert!(!entry.contains("<b>"));
    }

    #[test]
    fn page_without_body_tag_is_appended_to() {
        let page = append_figure(Some("<p>old</p>"), "a.png", "x");
        assert!(page.starts_with("<p>old</p>\n<figure>"));
    }
}
