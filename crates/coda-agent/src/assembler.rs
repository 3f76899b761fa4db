//! Reassembly of streamed tool-call fragments.
//!
//! Providers stream tool calls in pieces keyed by a position index. The
//! first fragment for an index opens an empty call; later fragments append
//! to its id, name and argument text. Calls keep the order in which their
//! index was first seen.

use coda_llm::ToolCall;

/// Accumulates tool-call fragments for one model turn.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    indexes: Vec<usize>,
    calls: Vec<ToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment. Absent or empty pieces are ignored.
    pub fn push(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let call = self.slot(index);
        if let Some(id) = id {
            call.id.push_str(id);
        }
        if let Some(name) = name {
            call.name.push_str(name);
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(arguments);
        }
    }

    fn slot(&mut self, index: usize) -> &mut ToolCall {
        let pos = match self.indexes.iter().position(|&i| i == index) {
            Some(pos) => pos,
            None => {
                self.indexes.push(index);
                self.calls.push(ToolCall::default());
                self.calls.len() - 1
            }
        };
        &mut self.calls[pos]
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Number of distinct calls seen so far.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// The finished calls in first-introduction order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_fragment() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push(0, Some("call_1"), Some("max_flow"), Some(r#"{"s":0}"#));
        assert_eq!(
            assembler.finish(),
            vec![ToolCall::new("call_1", "max_flow", r#"{"s":0}"#)]
        );
    }

    #[test]
    fn test_interleaved_indexes_keep_first_seen_order() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push(1, Some("b"), Some("second"), None);
        assembler.push(0, Some("a"), Some("first"), None);
        assembler.push(1, None, None, Some("{}"));
        assembler.push(0, None, None, Some(r#"{"x""#));
        assembler.push(0, None, None, Some(":1}"));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ToolCall::new("b", "second", "{}"));
        assert_eq!(calls[1], ToolCall::new("a", "first", r#"{"x":1}"#));
    }

    #[test]
    fn test_empty_fragments_open_a_call() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push(0, None, None, None);
        assembler.push(0, Some(""), Some("solve"), Some(""));
        assert_eq!(assembler.len(), 1);
        assert_eq!(assembler.finish()[0], ToolCall::new("", "solve", ""));
    }

    fn split_points(text: &str, cuts: &[usize]) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (chars.len() + 1)).collect();
        points.push(0);
        points.push(chars.len());
        points.sort_unstable();
        points
            .windows(2)
            .map(|w| chars[w[0]..w[1]].iter().collect())
            .collect()
    }

    proptest! {
        #[test]
        fn fragmentation_does_not_change_result(
            id in "[a-z0-9_]{1,12}",
            name in "[a-z_]{1,16}",
            arguments in "\\PC{0,64}",
            id_cuts in proptest::collection::vec(any::<usize>(), 0..4),
            name_cuts in proptest::collection::vec(any::<usize>(), 0..4),
            arg_cuts in proptest::collection::vec(any::<usize>(), 0..24),
        ) {
            let mut assembler = ToolCallAssembler::new();
            for piece in split_points(&id, &id_cuts) {
                assembler.push(3, Some(&piece), None, None);
            }
            for piece in split_points(&name, &name_cuts) {
                assembler.push(3, None, Some(&piece), None);
            }
            for piece in split_points(&arguments, &arg_cuts) {
                assembler.push(3, None, None, Some(&piece));
            }

            let mut whole = ToolCallAssembler::new();
            whole.push(3, Some(&id), Some(&name), Some(&arguments));

            prop_assert_eq!(assembler.finish(), whole.finish());
        }

        #[test]
        fn single_char_fragments(arguments in "\\PC{0,48}") {
            let mut assembler = ToolCallAssembler::new();
            assembler.push(0, Some("id"), Some("t"), None);
            for ch in arguments.chars() {
                assembler.push(0, None, None, Some(&ch.to_string()));
            }
            let calls = assembler.finish();
            prop_assert_eq!(calls.len(), 1);
            prop_assert_eq!(&calls[0].arguments, &arguments);
        }
    }
}
