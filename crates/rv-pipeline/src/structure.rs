/// A logical section of a document, as seen by the Structure stage.
///
/// Markdown-style `#` headings start a new section; plain text with no
/// headings collapses to a single unnamed section holding the whole body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub sections: Vec<Section>,
}

impl Document {
    pub fn full_text(&self) -> String {
        self.sections
            .iter()
            .map(|s| match &s.heading {
                Some(h) => format!("{}\n{}", h, s.body),
                None => s.body.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Splits parsed text into sections on markdown ATX headings (`# `, `## `,
/// ...). Pure function: no I/O, no `.await`.
pub fn structure(text: &str) -> Document {
    let mut sections = Vec::new();
    let mut current_heading: Option<String> = None;
    let mut current_body = String::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        let is_heading = trimmed.starts_with('#') && trimmed.trim_start_matches('#').starts_with(' ');
        if is_heading {
            if current_heading.is_some() || !current_body.trim().is_empty() {
                sections.push(Section { heading: current_heading.take(), body: current_body.trim().to_string() });
                current_body.clear();
            }
            current_heading = Some(trimmed.to_string());
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if current_heading.is_some() || !current_body.trim().is_empty() {
        sections.push(Section { heading: current_heading, body: current_body.trim().to_string() });
    }
    if sections.is_empty() {
        sections.push(Section { heading: None, body: String::new() });
    }

    Document { sections }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_becomes_one_unnamed_section() {
        let doc = structure("just some prose\nacross two lines");
        assert_eq!(doc.sections.len(), 1);
        assert!(doc.sections[0].heading.is_none());
    }

    #[test]
    fn headings_start_new_sections() {
        let doc = structure("# Intro\nhello\n\n## Details\nmore text");
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].heading.as_deref(), Some("# Intro"));
        assert_eq!(doc.sections[1].heading.as_deref(), Some("## Details"));
    }

    #[test]
    fn empty_input_yields_one_empty_section() {
        let doc = structure("");
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].body, "");
    }
}
