// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Line Editing
//!
//! A [`LineEditor`] is a stateful edit policy that is shown every current line of
//! an ordered text sequence exactly once, in order, and decides per line whether
//! to keep, replace or remove it. Once all lines have been seen,
//! [`LineEditor::on_complete`] yields the lines that must be appended.
//!
//! [`edit_lines`] drives an editor over a sequence and produces the final
//! sequence plus a human-readable trail. It has no side effects; persisting the
//! result is the job of `application::rule_reconciler`.

/// Decision for a single current line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEdit {
    Keep,
    Replace(String),
    Remove,
}

pub trait LineEditor: Send {
    fn edit(&mut self, line: &str) -> LineEdit;

    /// Lines wanted but never matched against a current line.
    fn on_complete(&mut self) -> Vec<String>;
}

/// Result of running an editor over a sequence of lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditedLines {
    pub lines: Vec<String>,
    /// `-removed` / `+added` entries in the order the edits were made
    pub trail: Vec<String>,
}

impl EditedLines {
    pub fn is_changed(&self) -> bool {
        !self.trail.is_empty()
    }
}

pub fn edit_lines(current: &[String], editor: &mut dyn LineEditor) -> EditedLines {
    let mut result = EditedLines {
        lines: Vec::with_capacity(current.len()),
        trail: Vec::new(),
    };

    for line in current {
        match editor.edit(line) {
            LineEdit::Keep => result.lines.push(line.clone()),
            LineEdit::Replace(replacement) => {
                if replacement != *line {
                    result.trail.push(format!("-{}", line));
                    result.trail.push(format!("+{}", replacement));
                }
                result.lines.push(replacement);
            }
            LineEdit::Remove => result.trail.push(format!("-{}", line)),
        }
    }

    for line in editor.on_complete() {
        result.trail.push(format!("+{}", line));
        result.lines.push(line);
    }

    result
}
