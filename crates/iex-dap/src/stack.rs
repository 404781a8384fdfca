//! Synthetic stack frames and placeholder variables.
//!
//! The pseudo-debugger has no real call stack, so stack traces are
//! fabricated from the text of the line under the cursor, and variables are
//! fixed placeholders keyed by the scope's handle id.

use std::path::Path;

use dap::types::{Source, StackFrame, Variable};

use crate::handles::Handles;

/// Number of frames fabricated per stack trace.
pub const FRAME_COUNT: usize = 3;

/// Builds the synthetic stack: one frame per leading word of the current
/// line, named `word(index)`, all pointing at the cursor position. Lines
/// with fewer words than frames fall back to the name `frame`.
pub fn synthesize_frames(
    source_file: &Path,
    current_line_text: &str,
    client_line: i64,
) -> Vec<StackFrame> {
    let words: Vec<&str> = current_line_text.split_whitespace().collect();
    let source = Source {
        name: source_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        path: Some(source_file.to_string_lossy().into_owned()),
        ..Default::default()
    };

    (0..FRAME_COUNT)
        .map(|i| {
            let name = words.get(i).copied().unwrap_or("frame");
            StackFrame {
                id: i as i64,
                name: format!("{name}({i})"),
                source: Some(source.clone()),
                line: client_line,
                column: 0,
                ..Default::default()
            }
        })
        .collect()
}

/// Placeholder variables for one resolved scope id: an integer, a float, a
/// string, and a nested object whose children come from a fresh handle.
pub fn placeholder_variables(scope_id: &str, handles: &mut Handles) -> Vec<Variable> {
    let leaf = |name: String, value: &str| Variable {
        name,
        value: value.to_string(),
        variables_reference: 0,
        ..Default::default()
    };

    vec![
        leaf(format!("{scope_id}_i"), "123"),
        leaf(format!("{scope_id}_f"), "3.14"),
        leaf(format!("{scope_id}_s"), "hello world"),
        Variable {
            name: format!("{scope_id}_o"),
            value: "Object".to_string(),
            variables_reference: handles.create("object_"),
            ..Default::default()
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_take_names_from_the_line_words() {
        let frames = synthesize_frames(Path::new("/p/mix.exs"), "def project do", 4);
        assert_eq!(frames.len(), FRAME_COUNT);
        assert_eq!(frames[0].name, "def(0)");
        assert_eq!(frames[1].name, "project(1)");
        assert_eq!(frames[2].name, "do(2)");
        assert!(frames.iter().all(|f| f.line == 4 && f.column == 0));
        let source = frames[0].source.as_ref().expect("frame has a source");
        assert_eq!(source.name.as_deref(), Some("mix.exs"));
    }

    #[test]
    fn short_lines_fall_back_to_a_generic_frame_name() {
        let frames = synthesize_frames(Path::new("/p/mix.exs"), "end", 9);
        assert_eq!(frames[0].name, "end(0)");
        assert_eq!(frames[1].name, "frame(1)");
        assert_eq!(frames[2].name, "frame(2)");
    }

    #[test]
    fn placeholders_cover_the_four_primitive_shapes() {
        let mut handles = Handles::new();
        let vars = placeholder_variables("local_0", &mut handles);
        assert_eq!(vars.len(), 4);
        assert_eq!(vars[0].name, "local_0_i");
        assert_eq!(vars[0].value, "123");
        assert_eq!(vars[2].value, "hello world");
        // The object placeholder is expandable.
        assert_ne!(vars[3].variables_reference, 0);
        assert_eq!(handles.get(vars[3].variables_reference), Some("object_"));
    }
}
