//! Line-cursor pseudo-debugger over the launched source file.
//!
//! Execution is simulated: a cursor walks the text of the Mix file, and
//! control-flow requests move it by textual rules rather than by running
//! code. Lines are 0-based here; the adapter converts to the client's
//! 1-based numbering at the protocol boundary.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where a continue or step landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Cursor landed on a stopping line (a breakpoint or a plain step).
    Step { line: usize },
    /// Cursor reached a line containing the word `exception`.
    Exception { line: usize },
    /// No stopping line remains; the program "ran to completion".
    EndOfSource,
}

/// One requested breakpoint after position adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointPosition {
    pub verified: bool,
    pub line: usize,
}

pub struct LineDebugger {
    source_file: PathBuf,
    source_lines: Vec<String>,
    /// Adjusted breakpoint positions per file, including unverified ones.
    breakpoints: HashMap<PathBuf, Vec<usize>>,
    current_line: usize,
}

impl LineDebugger {
    /// Reads the launched source file and places the cursor on line 0.
    pub fn load(source_file: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(source_file)?;
        Ok(Self::from_lines(
            source_file.to_path_buf(),
            text.split('\n').map(str::to_string).collect(),
        ))
    }

    fn from_lines(source_file: PathBuf, source_lines: Vec<String>) -> Self {
        Self {
            source_file,
            source_lines,
            breakpoints: HashMap::new(),
            current_line: 0,
        }
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn current_line(&self) -> usize {
        self.current_line
    }

    /// Text of the line under the cursor. Empty once the cursor has walked
    /// past the end.
    pub fn current_line_text(&self) -> &str {
        self.source_lines
            .get(self.current_line)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Places the cursor on the first line for a stop-on-entry launch.
    pub fn stop_on_entry(&mut self) -> usize {
        self.current_line = 0;
        self.current_line
    }

    /// Replaces the breakpoints for `path` with the requested 0-based lines
    /// after position adjustment. Every adjusted position is stored, verified
    /// or not.
    pub fn set_breakpoints(
        &mut self,
        path: &Path,
        requested: &[usize],
    ) -> io::Result<Vec<BreakpointPosition>> {
        let reported = adjust_positions(path, requested)?;
        self.install_breakpoints(
            path.to_path_buf(),
            reported.iter().map(|bp| bp.line).collect(),
        );
        Ok(reported)
    }

    /// Installs already-adjusted positions, replacing any set for `path`.
    /// Used to carry breakpoints requested before the session existed.
    pub fn install_breakpoints(&mut self, path: PathBuf, lines: Vec<usize>) {
        self.breakpoints.insert(path, lines);
    }

    /// Runs the cursor forward until a breakpoint in the launched file or a
    /// line containing `exception`, whichever comes first.
    pub fn run(&mut self) -> Stop {
        let breakpoints = self.breakpoints.get(&self.source_file);
        for line in self.current_line + 1..self.source_lines.len() {
            if breakpoints.is_some_and(|lines| lines.contains(&line)) {
                self.current_line = line;
                return Stop::Step { line };
            }
            if self.source_lines[line].contains("exception") {
                self.current_line = line;
                return Stop::Exception { line };
            }
        }
        Stop::EndOfSource
    }

    /// Advances the cursor to the next non-blank line.
    pub fn step(&mut self) -> Stop {
        for line in self.current_line + 1..self.source_lines.len() {
            if !self.source_lines[line].trim().is_empty() {
                self.current_line = line;
                return Stop::Step { line };
            }
        }
        Stop::EndOfSource
    }
}

/// Reads `path` and computes the adjusted position for each requested
/// 0-based line: a line starting with `+` pushes the breakpoint down one
/// line, and a line starting with `-` pushes it up one. Lines past the end
/// of the file stay where requested but come back unverified.
pub fn adjust_positions(path: &Path, requested: &[usize]) -> io::Result<Vec<BreakpointPosition>> {
    let text = fs::read_to_string(path)?;
    let lines: Vec<&str> = text.split('\n').collect();

    let mut reported = Vec::with_capacity(requested.len());
    for &req in requested {
        let mut line = req;
        let mut verified = false;
        if line < lines.len() {
            if lines[line].starts_with('+') {
                line += 1;
            }
            if line < lines.len() && lines[line].starts_with('-') {
                line = line.saturating_sub(1);
            }
            verified = true;
        }
        reported.push(BreakpointPosition { verified, line });
    }
    Ok(reported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debugger(lines: &[&str]) -> LineDebugger {
        LineDebugger::from_lines(
            PathBuf::from("/project/mix.exs"),
            lines.iter().map(|l| l.to_string()).collect(),
        )
    }

    fn write_source(lines: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("mix.exs");
        fs::write(&path, lines.join("\n")).expect("write source");
        (dir, path)
    }

    #[test]
    fn plus_line_pushes_breakpoint_down() {
        let (_dir, path) = write_source(&["defmodule M do", "+ added line", "  def f, do: 1"]);
        let mut dbg = LineDebugger::load(&path).expect("load source");
        let reported = dbg.set_breakpoints(&path, &[1]).expect("set breakpoints");
        assert_eq!(
            reported,
            [BreakpointPosition {
                verified: true,
                line: 2
            }]
        );
    }

    #[test]
    fn minus_line_pushes_breakpoint_up() {
        let (_dir, path) = write_source(&["defmodule M do", "- removed line", "end"]);
        let mut dbg = LineDebugger::load(&path).expect("load source");
        let reported = dbg.set_breakpoints(&path, &[1]).expect("set breakpoints");
        assert_eq!(
            reported,
            [BreakpointPosition {
                verified: true,
                line: 0
            }]
        );
    }

    #[test]
    fn adjustment_is_stable_when_reapplied() {
        let (_dir, path) = write_source(&["defmodule M do", "+ added line", "  def f, do: 1"]);
        let first = adjust_positions(&path, &[1]).expect("adjust once");
        let second = adjust_positions(&path, &[first[0].line]).expect("adjust again");
        assert_eq!(second[0].line, first[0].line);
        assert!(second[0].verified);
    }

    #[test]
    fn breakpoint_past_the_end_is_unverified_but_kept() {
        let (_dir, path) = write_source(&["only line"]);
        let mut dbg = LineDebugger::load(&path).expect("load source");
        let reported = dbg.set_breakpoints(&path, &[7]).expect("set breakpoints");
        assert_eq!(
            reported,
            [BreakpointPosition {
                verified: false,
                line: 7
            }]
        );
    }

    #[test]
    fn run_stops_at_the_first_breakpoint() {
        let (_dir, path) = write_source(&["a", "b", "c", "d"]);
        let mut dbg = LineDebugger::load(&path).expect("load source");
        dbg.set_breakpoints(&path, &[2]).expect("set breakpoints");
        assert_eq!(dbg.run(), Stop::Step { line: 2 });
        assert_eq!(dbg.current_line(), 2);
    }

    #[test]
    fn run_stops_at_an_exception_line_before_a_later_breakpoint() {
        let (_dir, path) = write_source(&["a", "raise exception here", "b", "c"]);
        let mut dbg = LineDebugger::load(&path).expect("load source");
        dbg.set_breakpoints(&path, &[3]).expect("set breakpoints");
        assert_eq!(dbg.run(), Stop::Exception { line: 1 });
    }

    #[test]
    fn run_without_stops_reaches_end_of_source() {
        let mut dbg = debugger(&["a", "b"]);
        assert_eq!(dbg.run(), Stop::EndOfSource);
        // The cursor does not move past the end.
        assert_eq!(dbg.current_line(), 0);
    }

    #[test]
    fn step_skips_blank_lines() {
        let mut dbg = debugger(&["first", "", "   ", "fourth"]);
        assert_eq!(dbg.step(), Stop::Step { line: 3 });
        assert_eq!(dbg.step(), Stop::EndOfSource);
    }

    #[test]
    fn breakpoints_in_another_file_do_not_stop_the_run() {
        let (_dir, path) = write_source(&["a", "b", "c"]);
        let mut dbg = debugger(&["a", "b", "c"]);
        dbg.set_breakpoints(&path, &[1]).expect("set breakpoints");
        assert_eq!(dbg.run(), Stop::EndOfSource);
    }
}
