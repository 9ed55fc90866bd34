//! Markdown issue files: YAML front matter plus a body.
//!
//! ```text
//! ---
//! issue: 42
//! url: https://github.com/octo/kb/issues/42
//! title: Fix login bug
//! labels: [bug, auth]
//! state: open
//! ---
//!
//! Steps to reproduce...
//! ```
//!
//! `issue: true` tags a file that has no remote issue yet. Keys this module
//! does not know about are kept as-is when a file is rewritten.

use crate::error::SyncError;
use crate::models::issue::{IssueFields, IssueState};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

const DELIMITER: &str = "---";

/// The `issue:` key: either a tag or the linked issue number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IssueTag {
    Number(i64),
    Flag(bool),
}

/// Front matter of an issue file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueFrontMatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<IssueTag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,

    /// Project-board field name to value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub project: BTreeMap<String, Value>,

    /// Keys owned by other tools.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IssueFrontMatter {
    /// Whether the file takes part in sync.
    pub fn is_issue(&self) -> bool {
        match self.issue {
            Some(IssueTag::Number(_)) => true,
            Some(IssueTag::Flag(flag)) => flag,
            None => false,
        }
    }

    /// Linked remote issue number, if any.
    pub fn remote_number(&self) -> Option<i64> {
        match self.issue {
            Some(IssueTag::Number(n)) => Some(n),
            _ => None,
        }
    }

    /// Issue fields described by this front matter and body.
    pub fn to_fields(&self, body: &str) -> IssueFields {
        IssueFields {
            title: self.title.clone().unwrap_or_default(),
            body: body.to_string(),
            labels: self.labels.clone(),
            assignees: self.assignees.clone(),
            milestone: self.milestone.clone(),
            state: self.state.unwrap_or_default(),
            project_fields: self
                .project
                .iter()
                .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                .collect(),
        }
        .normalized()
    }

    /// Overwrite the synced keys with `fields`, keeping everything else.
    pub fn apply_fields(&mut self, fields: &IssueFields) {
        let fields = fields.normalized();
        self.title = Some(fields.title);
        self.labels = fields.labels;
        self.assignees = fields.assignees;
        self.milestone = fields.milestone;
        self.state = Some(fields.state);
        self.project = fields
            .project_fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
    }

    /// Record the remote issue this file is linked to.
    pub fn link(&mut self, number: i64, url: &str) {
        self.issue = Some(IssueTag::Number(number));
        self.url = Some(url.to_string());
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Split a document into its raw front matter and body.
///
/// Returns `None` when the document does not open with a `---` line.
pub fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let first_line_end = content.find('\n')?;
    if content[..first_line_end].trim_end() != DELIMITER {
        return None;
    }

    let rest = &content[first_line_end + 1..];
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }

    None
}

/// Parse an issue file. Returns `None` for documents that are not tagged
/// with `issue:`.
pub fn parse_issue_file(content: &str) -> Result<Option<(IssueFrontMatter, String)>, SyncError> {
    let Some((yaml, body)) = split_front_matter(content) else {
        return Ok(None);
    };

    let front_matter: IssueFrontMatter = if yaml.trim().is_empty() {
        IssueFrontMatter::default()
    } else {
        serde_yaml::from_str(yaml)?
    };

    if !front_matter.is_issue() {
        return Ok(None);
    }

    let body = body.trim_start_matches(['\r', '\n']).to_string();
    Ok(Some((front_matter, body)))
}

/// Render an issue file from front matter and body.
pub fn render_issue_file(front_matter: &IssueFrontMatter, body: &str) -> Result<String, SyncError> {
    let yaml = serde_yaml::to_string(front_matter)?;
    let body = body.trim_start_matches(['\r', '\n']).trim_end();

    let mut out = String::with_capacity(yaml.len() + body.len() + 16);
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push('\n');
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body);
        out.push('\n');
    }
    Ok(out)
}

/// File name for an issue pulled from the remote: `<number>-<slug>.md`.
pub fn file_name_for_issue(number: i64, title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.chars().count() >= 60 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        format!("{}.md", number)
    } else {
        format!("{}-{}.md", number, slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINKED: &str = "---\nissue: 42\nurl: https://github.com/o/r/issues/42\ntitle: Fix login bug\nlabels:\n- bug\n- auth\nstate: open\nowner: docs-team\n---\n\nSteps to reproduce\n";

    #[test]
    fn test_parse_linked_issue() {
        let (fm, body) = parse_issue_file(LINKED).unwrap().unwrap();
        assert_eq!(fm.remote_number(), Some(42));
        assert_eq!(fm.title.as_deref(), Some("Fix login bug"));
        assert_eq!(body, "Steps to reproduce\n");
        assert_eq!(
            fm.extra.get("owner"),
            Some(&Value::String("docs-team".to_string()))
        );

        let fields = fm.to_fields(&body);
        assert_eq!(fields.labels, vec!["auth", "bug"]);
        assert_eq!(fields.body, "Steps to reproduce");
        assert_eq!(fields.state, IssueState::Open);
    }

    #[test]
    fn test_parse_tagged_issue_without_number() {
        let doc = "---\nissue: true\ntitle: New idea\n---\nBody\n";
        let (fm, _) = parse_issue_file(doc).unwrap().unwrap();
        assert!(fm.is_issue());
        assert_eq!(fm.remote_number(), None);
    }

    #[test]
    fn test_untagged_documents_are_ignored() {
        assert!(parse_issue_file("# Just notes\n").unwrap().is_none());
        assert!(parse_issue_file("---\ntitle: Notes\n---\nx").unwrap().is_none());
        assert!(parse_issue_file("---\nissue: false\n---\nx").unwrap().is_none());
        assert!(parse_issue_file("---\nissue: true\nno closing").unwrap().is_none());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(parse_issue_file("---\nissue: [1\n---\n").is_err());
    }

    #[test]
    fn test_render_keeps_unknown_keys_and_reparses() {
        let (mut fm, body) = parse_issue_file(LINKED).unwrap().unwrap();
        let mut fields = fm.to_fields(&body);
        fields.title = "Fix login bug (v2)".to_string();
        fields.project_fields.insert("Status".to_string(), "Done".to_string());
        fm.apply_fields(&fields);

        let rendered = render_issue_file(&fm, &fields.body).unwrap();
        assert!(rendered.starts_with("---\nissue: 42\n"));
        assert!(rendered.contains("owner: docs-team"));
        assert!(rendered.ends_with("\n\nSteps to reproduce\n"));

        let (again, again_body) = parse_issue_file(&rendered).unwrap().unwrap();
        assert_eq!(again.to_fields(&again_body), fields.normalized());
        assert_eq!(again.to_fields(&again_body).project_fields["Status"], "Done");
    }

    #[test]
    fn test_link_sets_number_and_url() {
        let mut fm = IssueFrontMatter {
            issue: Some(IssueTag::Flag(true)),
            title: Some("New".to_string()),
            ..Default::default()
        };
        fm.link(7, "https://github.com/o/r/issues/7");
        let rendered = render_issue_file(&fm, "").unwrap();
        assert!(rendered.contains("issue: 7"));
        assert!(rendered.contains("url: https://github.com/o/r/issues/7"));
    }

    #[test]
    fn test_file_name_for_issue() {
        assert_eq!(file_name_for_issue(42, "Fix login bug (v2)"), "42-fix-login-bug-v2.md");
        assert_eq!(file_name_for_issue(7, "!!!"), "7.md");
    }
}
