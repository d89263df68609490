//! kwatch diff renderer: turns two canonical revisions of an object into a
//! titled block with a colored, context-bounded unified diff.

#![forbid(unsafe_code)]

use chrono::{DateTime, SecondsFormat, Utc};
use kwatch_core::{generation, resource_version, ChangeEvent, ChangeKind, Document, ResourceIdentity};
use kwatch_transform::{Pipeline, TransformError};
use serde::{Deserialize, Serialize};
use similar::udiff::UnifiedHunkHeader;
use similar::{Algorithm, ChangeTag, DiffTag, TextDiff};

pub mod theme;

pub use theme::{Theme, ThemeId, UnknownTheme};

/// Title used for the side of a diff that has no revision.
pub const ABSENT_TITLE: &str = "(none)";

const RULE: &str = "---------------------------------------------";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    pub context_lines: usize,
    pub create_theme: ThemeId,
    pub update_theme: ThemeId,
    pub delete_theme: ThemeId,
    /// Render the last known revision of deleted objects instead of a bare header.
    pub show_deleted: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            create_theme: ThemeId::Green,
            update_theme: ThemeId::Default,
            delete_theme: ThemeId::Red,
            show_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Renderer {
    opts: RenderOptions,
}

impl Renderer {
    pub fn new(opts: RenderOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.opts
    }

    pub fn theme_for(&self, kind: ChangeKind) -> Theme {
        match kind {
            ChangeKind::Create => self.opts.create_theme,
            ChangeKind::Update => self.opts.update_theme,
            ChangeKind::Delete => self.opts.delete_theme,
        }
        .theme()
    }

    /// Line diff with word-level emphasis, rendered in unified format.
    /// Identical inputs render to an empty string.
    pub fn unified(&self, old: &str, new: &str, title_a: &str, title_b: &str, theme: &Theme) -> String {
        let diff = TextDiff::configure().algorithm(Algorithm::Myers).diff_lines(old, new);
        if diff.ops().iter().all(|op| op.tag() == DiffTag::Equal) {
            return String::new();
        }

        let mut out = String::with_capacity(old.len() + new.len() + 128);
        out.push_str(&theme.paint(theme.header, &format!("--- {}", title_a)));
        out.push('\n');
        out.push_str(&theme.paint(theme.header, &format!("+++ {}", title_b)));
        out.push('\n');

        for group in diff.grouped_ops(self.opts.context_lines) {
            out.push_str(&theme.paint(theme.hunk, &UnifiedHunkHeader::new(&group).to_string()));
            out.push('\n');
            for op in &group {
                for change in diff.iter_inline_changes(op) {
                    let (sign, base, emphasis) = match change.tag() {
                        ChangeTag::Delete => ("-", theme.delete, theme.delete_emphasis),
                        ChangeTag::Insert => ("+", theme.insert, theme.insert_emphasis),
                        ChangeTag::Equal => (" ", owo_colors::Style::new(), owo_colors::Style::new()),
                    };
                    out.push_str(&theme.paint(base, sign));
                    for (emphasized, value) in change.iter_strings_lossy() {
                        let text = value.trim_end_matches(|c: char| c == '\n' || c == '\r');
                        out.push_str(&theme.paint(if emphasized { emphasis } else { base }, text));
                    }
                    out.push('\n');
                    if change.missing_newline() {
                        out.push_str("\\ No newline at end of file\n");
                    }
                }
            }
        }
        out
    }
}

/// First line of every block: action, identity and a horizontal rule.
pub fn block_header(kind: ChangeKind, identity: &ResourceIdentity) -> String {
    format!("--- {} --- {} {}", kind.label(), identity.key(), RULE)
}

/// Title for one side of a diff: kind, identity, when it was seen, revision and generation.
pub fn diff_title(identity: &ResourceIdentity, doc: Option<&Document>, seen_at: DateTime<Utc>) -> String {
    let Some(doc) = doc else {
        return ABSENT_TITLE.to_string();
    };
    let kind = doc.get("kind").and_then(|k| k.as_str()).unwrap_or(&identity.kind);
    format!(
        "{} {} @ {} (rv {}) (gen. {})",
        kind,
        identity.key(),
        seen_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        resource_version(doc).unwrap_or("-"),
        generation(doc)
    )
}

/// Transform pipeline and renderer bound together: one change event in, one
/// complete output block out.
#[derive(Debug, Clone, Default)]
pub struct Differ {
    pipeline: Pipeline,
    renderer: Renderer,
}

impl Differ {
    pub fn new(pipeline: Pipeline, renderer: Renderer) -> Self {
        Self { pipeline, renderer }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Header line, diff body (possibly empty) and a trailing blank line.
    pub fn render(&self, event: &ChangeEvent) -> Result<String, TransformError> {
        let theme = self.renderer.theme_for(event.kind);
        let identity = &event.identity;
        let previous = event.previous.as_ref();

        let body = match event.kind {
            ChangeKind::Delete if !self.renderer.options().show_deleted => String::new(),
            ChangeKind::Delete => {
                // the final state carried by the notification stands in when nothing was cached
                let (last, seen_at) = match previous {
                    Some(snap) => (&snap.raw, snap.seen_at),
                    None => (&event.current, event.observed_at),
                };
                let old = self.pipeline.canonical(Some(last))?;
                let title_a = diff_title(identity, Some(last), seen_at);
                self.renderer.unified(&old, "", &title_a, ABSENT_TITLE, &theme)
            }
            ChangeKind::Create | ChangeKind::Update => {
                let old = self.pipeline.canonical(previous.map(|s| &s.raw))?;
                let new = self.pipeline.canonical(Some(&event.current))?;
                let title_a = match previous {
                    Some(snap) => diff_title(identity, Some(&snap.raw), snap.seen_at),
                    None => ABSENT_TITLE.to_string(),
                };
                let title_b = diff_title(identity, Some(&event.current), event.observed_at);
                self.renderer.unified(&old, &new, &title_a, &title_b, &theme)
            }
        };

        let mut block = theme.paint(theme.header, &block_header(event.kind, identity));
        block.push('\n');
        block.push_str(&body);
        block.push('\n');
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kwatch_core::Snapshot;
    use serde_json::json;

    fn plain() -> Renderer {
        Renderer::new(RenderOptions {
            context_lines: 1,
            create_theme: ThemeId::Plain,
            update_theme: ThemeId::Plain,
            delete_theme: ThemeId::Plain,
            show_deleted: false,
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn pod(app: &str, rv: &str) -> Document {
        json!({
            "kind": "Pod",
            "metadata": {"name": "nginx", "namespace": "default", "resourceVersion": rv, "labels": {"app": app}},
            "spec": {"containers": [{"image": "nginx:1.25", "name": "nginx"}]}
        })
    }

    #[test]
    fn identical_texts_render_nothing() {
        let r = plain();
        assert_eq!(r.unified("a: 1\nb: 2\n", "a: 1\nb: 2\n", "x", "y", &Theme::plain()), "");
    }

    #[test]
    fn empty_previous_shows_everything_inserted() {
        let out = plain().unified("", "a: 1\nb: 2\n", ABSENT_TITLE, "now", &Theme::plain());
        assert_eq!(out, "--- (none)\n+++ now\n@@ -0,0 +1,2 @@\n+a: 1\n+b: 2\n");
    }

    #[test]
    fn context_is_bounded() {
        let old = "a: 1\nb: 2\nc: 3\nd: 4\ne: 5\n";
        let new = "a: 1\nb: 2\nc: 30\nd: 4\ne: 5\n";
        let out = plain().unified(old, new, "old", "new", &Theme::plain());
        assert_eq!(out, "--- old\n+++ new\n@@ -2,3 +2,3 @@\n b: 2\n-c: 3\n+c: 30\n d: 4\n");
    }

    #[test]
    fn colored_output_carries_escapes() {
        let r = Renderer::default();
        let out = r.unified("a: 1\n", "a: 2\n", "old", "new", &r.theme_for(ChangeKind::Update));
        assert!(out.contains('\u{1b}'));
    }

    #[test]
    fn title_includes_revision_and_generation() {
        let id = ResourceIdentity::new("Pod", "default", "nginx");
        let doc = json!({"kind": "Pod", "metadata": {"resourceVersion": "7", "generation": 2}});
        assert_eq!(diff_title(&id, Some(&doc), at(0)), "Pod default/nginx @ 2023-11-14T22:13:20Z (rv 7) (gen. 2)");
        assert_eq!(diff_title(&id, None, at(0)), ABSENT_TITLE);
    }

    #[test]
    fn update_block_shows_changed_label() {
        let differ = Differ::new(Pipeline::default(), plain());
        let event = ChangeEvent {
            kind: ChangeKind::Update,
            identity: ResourceIdentity::new("Pod", "default", "nginx"),
            current: pod("nginx-v2", "2"),
            observed_at: at(10),
            previous: Some(Snapshot { raw: pod("nginx", "1"), seen_at: at(0) }),
        };
        let block = differ.render(&event).unwrap();
        assert!(block.starts_with("--- UPDATE --- default/nginx ---"), "{block}");
        assert!(block.ends_with("\n\n"));
        let removed: Vec<_> = block.lines().filter(|l| l.starts_with('-') && !l.starts_with("---")).collect();
        let added: Vec<_> = block.lines().filter(|l| l.starts_with('+') && !l.starts_with("+++")).collect();
        assert_eq!(removed.len(), 2, "{block}");
        assert_eq!(added.len(), 2, "{block}");
        assert!(removed.iter().any(|l| l.contains("app: nginx")));
        assert!(added.iter().any(|l| l.contains("app: nginx-v2")));
    }

    #[test]
    fn delete_block_is_header_only_by_default() {
        let differ = Differ::new(Pipeline::default(), plain());
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            identity: ResourceIdentity::new("Pod", "default", "nginx"),
            current: pod("nginx", "3"),
            observed_at: at(20),
            previous: Some(Snapshot { raw: pod("nginx", "2"), seen_at: at(10) }),
        };
        let block = differ.render(&event).unwrap();
        assert_eq!(block, format!("--- DELETE --- default/nginx {}\n\n", RULE));
    }

    #[test]
    fn delete_block_can_show_last_known_revision() {
        let mut opts = plain().options().clone();
        opts.show_deleted = true;
        let differ = Differ::new(Pipeline::default(), Renderer::new(opts));
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            identity: ResourceIdentity::new("Pod", "default", "nginx"),
            current: pod("nginx", "3"),
            observed_at: at(20),
            previous: None,
        };
        let block = differ.render(&event).unwrap();
        assert!(block.contains("+++ (none)"), "{block}");
        assert!(block.lines().any(|l| l == "-kind: Pod"));
        assert!(!block.lines().any(|l| l.starts_with('+') && !l.starts_with("+++")));
    }
}
