//! Diff engine
//!
//! Produces copy/insert edit scripts between two blobs. Text is diffed line by
//! line (Myers); binary input falls back to a single whole-blob insert so that
//! the diff cost never blows up on data without line structure.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag, DiffTag, TextDiff};

use crate::error::{Error, Result};
use crate::hash::BlobHash;

/// Number of leading bytes inspected by [`is_text`]
pub const TEXT_SAMPLE_LEN: usize = 8000;

/// One step of an edit script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchOp {
    /// Copy `len` bytes of the base starting at `offset`
    Copy { offset: u64, len: u64 },
    /// Emit literal bytes
    Insert(Vec<u8>),
}

/// Edit script transforming the blob `base` into the blob `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub base: BlobHash,
    pub target: BlobHash,
    pub ops: Vec<PatchOp>,
}

impl Patch {
    /// Number of literal bytes carried by the patch
    pub fn inserted_bytes(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                PatchOp::Insert(bytes) => bytes.len(),
                PatchOp::Copy { .. } => 0,
            })
            .sum()
    }

    /// True when the patch reuses nothing from its base
    pub fn is_full_replacement(&self) -> bool {
        !self.ops.iter().any(|op| matches!(op, PatchOp::Copy { .. }))
    }
}

/// Heuristic text detection: a NUL byte, or more than 30% control bytes,
/// within the first [`TEXT_SAMPLE_LEN`] bytes marks the data as binary.
pub fn is_text(data: &[u8]) -> bool {
    let sample = &data[..data.len().min(TEXT_SAMPLE_LEN)];
    if sample.contains(&0) {
        return false;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
        .count();
    control * 10 <= sample.len() * 3
}

/// Compute the edit script turning `old` into `new`
pub fn diff(old: &[u8], new: &[u8]) -> Patch {
    let mut builder = OpsBuilder::default();

    if old.is_empty() || !is_text(old) || !is_text(new) {
        builder.insert(new);
    } else {
        let old_lines: Vec<&[u8]> = old.split_inclusive(|&b| b == b'\n').collect();
        let new_lines: Vec<&[u8]> = new.split_inclusive(|&b| b == b'\n').collect();

        let mut old_offsets = Vec::with_capacity(old_lines.len() + 1);
        let mut pos = 0u64;
        old_offsets.push(pos);
        for line in &old_lines {
            pos += line.len() as u64;
            old_offsets.push(pos);
        }

        let ops = similar::capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);
        for op in ops {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => {
                    let start = old_offsets[old_range.start];
                    let end = old_offsets[old_range.end];
                    builder.copy(start, end - start);
                }
                DiffTag::Delete => {}
                DiffTag::Insert | DiffTag::Replace => {
                    for line in &new_lines[new_range] {
                        builder.insert(line);
                    }
                }
            }
        }
    }

    Patch {
        base: BlobHash::from_data(old),
        target: BlobHash::from_data(new),
        ops: builder.finish(),
    }
}

/// Reconstruct the target of `patch` from its base bytes
pub fn apply(old: &[u8], patch: &Patch) -> Result<Vec<u8>> {
    let actual = BlobHash::from_data(old);
    if actual != patch.base {
        return Err(Error::PatchMismatch {
            expected: patch.base,
            actual,
        });
    }

    let mut out = Vec::with_capacity(old.len() + patch.inserted_bytes());
    for op in &patch.ops {
        match op {
            PatchOp::Copy { offset, len } => {
                let start = usize::try_from(*offset)
                    .map_err(|_| Error::Corrupted("patch offset overflow".into()))?;
                let end = start
                    .checked_add(usize::try_from(*len).unwrap_or(usize::MAX))
                    .filter(|&end| end <= old.len())
                    .ok_or_else(|| {
                        Error::Corrupted(format!(
                            "patch copies {}+{} from a {} byte base",
                            offset,
                            len,
                            old.len()
                        ))
                    })?;
                out.extend_from_slice(&old[start..end]);
            }
            PatchOp::Insert(bytes) => out.extend_from_slice(bytes),
        }
    }

    if BlobHash::from_data(&out) != patch.target {
        return Err(Error::Corrupted(format!(
            "patch output does not hash to {}",
            patch.target
        )));
    }
    Ok(out)
}

/// Human-readable unified diff with three lines of context
pub fn render_unified(old: &[u8], new: &[u8], path: &str) -> String {
    let mut output = String::new();
    output.push_str(&format!("--- a/{}\n", path));
    output.push_str(&format!("+++ b/{}\n", path));

    if !is_text(old) || !is_text(new) {
        output.push_str(&format!("Binary files a/{} and b/{} differ\n", path, path));
        return output;
    }

    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(old_text.as_ref(), new_text.as_ref());

    for group in diff.grouped_ops(3) {
        let (first, last) = match (group.first(), group.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };
        let old_start = first.old_range().start;
        let new_start = first.new_range().start;
        let old_len = last.old_range().end - old_start;
        let new_len = last.new_range().end - new_start;
        output.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_start + 1,
            old_len,
            new_start + 1,
            new_len
        ));

        for op in &group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                output.push_str(sign);
                output.push_str(change.value());
                if !change.value().ends_with('\n') {
                    output.push_str("\n\\ No newline at end of file\n");
                }
            }
        }
    }

    output
}

/// Accumulates ops, merging adjacent copies and inserts
#[derive(Default)]
struct OpsBuilder {
    ops: Vec<PatchOp>,
}

impl OpsBuilder {
    fn copy(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        if let Some(PatchOp::Copy {
            offset: prev_offset,
            len: prev_len,
        }) = self.ops.last_mut()
        {
            if *prev_offset + *prev_len == offset {
                *prev_len += len;
                return;
            }
        }
        self.ops.push(PatchOp::Copy { offset, len });
    }

    fn insert(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(PatchOp::Insert(prev)) = self.ops.last_mut() {
            prev.extend_from_slice(bytes);
            return;
        }
        self.ops.push(PatchOp::Insert(bytes.to_vec()));
    }

    fn finish(self) -> Vec<PatchOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_line_diff_copies_unchanged_lines() {
        let old = b"alpha\nbeta\ngamma\n";
        let new = b"alpha\nBETA\ngamma\n";
        let patch = diff(old, new);

        assert_eq!(
            patch.ops,
            vec![
                PatchOp::Copy { offset: 0, len: 6 },
                PatchOp::Insert(b"BETA\n".to_vec()),
                PatchOp::Copy { offset: 11, len: 6 },
            ]
        );
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[test]
    fn test_identical_inputs_are_one_copy() {
        let data = b"one\ntwo\nthree";
        let patch = diff(data, data);
        assert_eq!(
            patch.ops,
            vec![PatchOp::Copy {
                offset: 0,
                len: data.len() as u64
            }]
        );
    }

    #[test]
    fn test_empty_inputs() {
        let patch = diff(b"", b"");
        assert!(patch.ops.is_empty());
        assert_eq!(apply(b"", &patch).unwrap(), b"");

        let patch = diff(b"", b"fresh");
        assert_eq!(apply(b"", &patch).unwrap(), b"fresh");

        let patch = diff(b"gone\n", b"");
        assert!(patch.ops.is_empty());
        assert_eq!(apply(b"gone\n", &patch).unwrap(), b"");
    }

    #[test]
    fn test_binary_falls_back_to_whole_replacement() {
        let old = [0u8, 1, 2, 3, 4, 5];
        let new = [0u8, 1, 2, 9, 4, 5];
        let patch = diff(&old, &new);
        assert!(patch.is_full_replacement());
        assert_eq!(patch.ops, vec![PatchOp::Insert(new.to_vec())]);
        assert_eq!(apply(&old, &patch).unwrap(), new);
    }

    #[test]
    fn test_apply_rejects_wrong_base() {
        let patch = diff(b"base one\n", b"target\n");
        match apply(b"base two\n", &patch) {
            Err(Error::PatchMismatch { expected, actual }) => {
                assert_eq!(expected, BlobHash::from_data(b"base one\n"));
                assert_eq!(actual, BlobHash::from_data(b"base two\n"));
            }
            other => panic!("expected PatchMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_detects_tampered_ops() {
        let old = b"a\nb\n";
        let mut patch = diff(old, b"a\nc\n");
        patch.ops.push(PatchOp::Copy { offset: 2, len: 100 });
        assert!(matches!(apply(old, &patch), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_is_text() {
        assert!(is_text(b""));
        assert!(is_text(b"plain text\twith tabs\r\n"));
        assert!(!is_text(b"nul\0inside"));
        assert!(!is_text(&[1, 2, 3, 4, 5, b'a']));
    }

    #[test]
    fn test_render_unified() {
        let out = render_unified(b"a\nb\nc\n", b"a\nB\nc\n", "f.txt");
        assert!(out.starts_with("--- a/f.txt\n+++ b/f.txt\n"));
        assert!(out.contains("@@ -1,3 +1,3 @@"));
        assert!(out.contains("-b\n"));
        assert!(out.contains("+B\n"));

        let bin = render_unified(&[0, 1], &[0, 2], "img.bin");
        assert!(bin.contains("Binary files a/img.bin and b/img.bin differ"));
    }

    proptest! {
        #[test]
        fn prop_apply_reverses_diff(
            old in proptest::collection::vec(any::<u8>(), 0..512),
            new in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let patch = diff(&old, &new);
            prop_assert_eq!(apply(&old, &patch).unwrap(), new);
        }

        #[test]
        fn prop_apply_reverses_line_diff(
            old in proptest::collection::vec("[a-c]{0,3}\n?", 0..40),
            new in proptest::collection::vec("[a-c]{0,3}\n?", 0..40),
        ) {
            let old = old.concat().into_bytes();
            let new = new.concat().into_bytes();
            let patch = diff(&old, &new);
            prop_assert_eq!(&patch, &diff(&old, &new));
            prop_assert_eq!(apply(&old, &patch).unwrap(), new);
        }
    }
}
