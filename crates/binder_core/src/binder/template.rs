//! Boilerplate document skeletons.
//!
//! Placeholders use `${name}`; unknown placeholders are left untouched.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

/// Standalone note skeleton; compiles on its own and as a sub-document of
/// the subject aggregate.
pub const NOTE_TEMPLATE: &str = r"\documentclass[class=memoir, crop=false, oneside, 12pt]{standalone}

\usepackage[subpreambles=true]{standalone}
\usepackage{import}
\usepackage[utf8]{inputenc}
\usepackage[english]{babel}
\usepackage{amsmath}
\usepackage{amssymb}
\usepackage{graphicx}
\usepackage[colorlinks=true, linkcolor=., urlcolor=blue]{hyperref}
\graphicspath{{./graphics/}}

\author{${author}}
\title{${title}}
\date{${date}}

\begin{document}
\chapter{${title}}

\end{document}
";

/// Aggregate skeleton that pulls every note of a subject in as a section.
pub const AGGREGATE_TEMPLATE: &str = r"\documentclass[class=memoir, crop=false, oneside, 12pt]{standalone}

\usepackage[subpreambles=true, sort=true, print=true, nocomments]{standalone}
\usepackage{import}
\usepackage[utf8]{inputenc}
\usepackage[english]{babel}
\usepackage{amsmath}
\usepackage{amssymb}
\usepackage{graphicx}
\usepackage[colorlinks=true, linkcolor=., urlcolor=blue]{hyperref}
\graphicspath{{./graphics/}}

\author{${author}}
\title{${subject}}
\date{${date}}

\begin{document}
\maketitle
\tableofcontents
\mainmatter

${includes}
\end{document}
";

/// Named values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

/// Substitutes every known `${key}` in `template`.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            vars.values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Today's date in the long form used on title pages.
pub fn today() -> String {
    chrono::Local::now().format("%B %d, %Y").to_string()
}

/// Renders the boilerplate for one new note.
pub fn note_boilerplate(title: &str, author: &str) -> String {
    render(
        NOTE_TEMPLATE,
        &TemplateVars::new()
            .set("title", title)
            .set("author", author)
            .set("date", today()),
    )
}

/// Renders an aggregate document including each `(title, stem)` in order.
pub fn aggregate_document(subject: &str, author: &str, notes: &[(String, String)]) -> String {
    let includes = notes
        .iter()
        .map(|(title, stem)| format!("% {title}\n\\import{{./}}{{{stem}}}\n"))
        .collect::<Vec<_>>()
        .join("\n");
    render(
        AGGREGATE_TEMPLATE,
        &TemplateVars::new()
            .set("subject", subject)
            .set("author", author)
            .set("date", today())
            .set("includes", includes),
    )
}
