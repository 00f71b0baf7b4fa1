//! Character-level diff and fuzzy patching over text.
//!
//! The diff is a Myers LCS bisect with common prefix/suffix trimming, merged
//! and then nudged so edit boundaries land on word or line boundaries. Patches
//! carry a small context window on each side so they can be relocated against
//! a target that has drifted from the text they were made against: application
//! slides each hunk within a bounded window, and a hunk whose context itself
//! was edited is repaired through a local diff instead of being rejected.
//!
//! All offsets are character offsets, never byte offsets, so multi-byte UTF-8
//! content is safe to patch.

use serde::{Deserialize, Serialize};

/// Context characters kept on each side of a hunk.
pub const PATCH_MARGIN: usize = 4;

/// How far a hunk may slide from its expected position during application.
pub const MATCH_WINDOW: usize = 32;

/// One edit operation in a diff script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edit {
    #[serde(rename = "eq")]
    Equal(String),
    #[serde(rename = "ins")]
    Insert(String),
    #[serde(rename = "del")]
    Delete(String),
}

impl Edit {
    pub fn text(&self) -> &str {
        match self {
            Edit::Equal(t) | Edit::Insert(t) | Edit::Delete(t) => t,
        }
    }

    fn char_len(&self) -> usize {
        self.text().chars().count()
    }
}

/// One relocatable hunk: an edit script plus expected positions and lengths.
///
/// `start1`/`length1` describe the hunk's footprint in the source text,
/// `start2`/`length2` in the patched text. All in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub diffs: Vec<Edit>,
    pub start1: usize,
    pub start2: usize,
    pub length1: usize,
    pub length2: usize,
}

impl Patch {
    fn new() -> Self {
        Self {
            diffs: Vec::new(),
            start1: 0,
            start2: 0,
            length1: 0,
            length2: 0,
        }
    }

    /// Concatenated Equal + Delete text: what the hunk expects to find.
    fn source_text(&self) -> Vec<char> {
        let mut out = Vec::with_capacity(self.length1);
        for d in &self.diffs {
            match d {
                Edit::Equal(t) | Edit::Delete(t) => out.extend(t.chars()),
                Edit::Insert(_) => {}
            }
        }
        out
    }

    /// Concatenated Equal + Insert text: what the hunk leaves behind.
    fn target_text(&self) -> Vec<char> {
        let mut out = Vec::with_capacity(self.length2);
        for d in &self.diffs {
            match d {
                Edit::Equal(t) | Edit::Insert(t) => out.extend(t.chars()),
                Edit::Delete(_) => {}
            }
        }
        out
    }
}

/// An ordered set of hunks produced from one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchBundle {
    pub patches: Vec<Patch>,
}

impl PatchBundle {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Insert,
    Delete,
}

type CharDiff = (Op, Vec<char>);

/// Compute a character-level edit script turning `a` into `b`.
pub fn diff(a: &str, b: &str) -> Vec<Edit> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut diffs = diff_main(&a, &b);
    cleanup_semantic_lossless(&mut diffs);
    cleanup_merge(&mut diffs);
    diffs
        .into_iter()
        .map(|(op, text)| {
            let text: String = text.into_iter().collect();
            match op {
                Op::Equal => Edit::Equal(text),
                Op::Insert => Edit::Insert(text),
                Op::Delete => Edit::Delete(text),
            }
        })
        .collect()
}

/// Build a patch bundle turning `a` into `b`, each hunk padded with
/// [`PATCH_MARGIN`] characters of context.
pub fn make_patch(a: &str, b: &str) -> PatchBundle {
    let diffs = diff(a, b);
    let mut patches = Vec::new();
    if diffs.is_empty() {
        return PatchBundle { patches };
    }

    let mut patch = Patch::new();
    let mut char_count1 = 0usize;
    let mut char_count2 = 0usize;
    // Text state before and after the hunks collected so far.
    let mut prepatch: Vec<char> = a.chars().collect();
    let mut postpatch: Vec<char> = prepatch.clone();

    let last = diffs.len() - 1;
    for (i, d) in diffs.iter().enumerate() {
        let len = d.char_len();
        if patch.diffs.is_empty() && !matches!(d, Edit::Equal(_)) {
            patch.start1 = char_count1;
            patch.start2 = char_count2;
        }

        match d {
            Edit::Insert(t) => {
                patch.diffs.push(d.clone());
                patch.length2 += len;
                postpatch.splice(char_count2..char_count2, t.chars());
            }
            Edit::Delete(_) => {
                patch.diffs.push(d.clone());
                patch.length1 += len;
                postpatch.drain(char_count2..char_count2 + len);
            }
            Edit::Equal(_) => {
                if len <= 2 * PATCH_MARGIN && !patch.diffs.is_empty() && i != last {
                    // Small equality inside a hunk: keep as interior context.
                    patch.diffs.push(d.clone());
                    patch.length1 += len;
                    patch.length2 += len;
                } else if len >= 2 * PATCH_MARGIN && !patch.diffs.is_empty() {
                    add_context(&mut patch, &prepatch);
                    patches.push(std::mem::replace(&mut patch, Patch::new()));
                    prepatch = postpatch.clone();
                    char_count1 = char_count2;
                }
            }
        }

        match d {
            Edit::Insert(_) => char_count2 += len,
            Edit::Delete(_) => char_count1 += len,
            Edit::Equal(_) => {
                char_count1 += len;
                char_count2 += len;
            }
        }
    }

    if !patch.diffs.is_empty() {
        add_context(&mut patch, &prepatch);
        patches.push(patch);
    }

    PatchBundle { patches }
}

/// Apply `bundle` against `text`, returning the patched text and one success
/// flag per hunk. Each hunk is located at or near its expected position,
/// sliding up to [`MATCH_WINDOW`] characters and tolerating a partially
/// drifted context (at most half the hunk's source may mismatch). An exact
/// match splices wholesale; an imperfect one is repaired through a local diff
/// so concurrent edits inside the context window survive. Hunks that cannot
/// be located are skipped; the bundle as a whole is considered applied only
/// if every flag is true (see [`applied_cleanly`]).
pub fn apply(bundle: &PatchBundle, text: &str) -> (String, Vec<bool>) {
    let mut chars: Vec<char> = text.chars().collect();
    let mut results = Vec::with_capacity(bundle.patches.len());
    // Tracks how far hunks have actually landed from where they expected to.
    let mut delta: isize = 0;

    for patch in &bundle.patches {
        let source = patch.source_text();
        let target = patch.start2 as isize + delta;

        match locate(&chars, &source, target) {
            Some(idx) => {
                let found = &chars[idx..idx + source.len()];
                if found == source.as_slice() {
                    let replacement = patch.target_text();
                    chars.splice(idx..idx + source.len(), replacement);
                } else {
                    apply_imperfect(&mut chars, idx, patch, &source);
                }
                // Downstream of this hunk the text is aligned with the
                // patched frame again, shifted by where the hunk landed.
                delta = idx as isize - patch.start2 as isize;
                results.push(true);
            }
            None => {
                // This hunk's length change never happened; later hunks
                // expect positions that are off by it.
                delta -= patch.length2 as isize - patch.length1 as isize;
                results.push(false);
            }
        }
    }

    (chars.into_iter().collect(), results)
}

/// True iff every hunk of an [`apply`] call succeeded.
pub fn applied_cleanly(results: &[bool]) -> bool {
    results.iter().all(|ok| *ok)
}

/// The hunk landed on a region that differs from its source text. Diff the
/// two to get a frame of equivalent indices, then replay the hunk's inserts
/// and deletes through that frame so unrelated drift is left alone.
fn apply_imperfect(chars: &mut Vec<char>, idx: usize, patch: &Patch, source: &[char]) {
    let found: Vec<char> = chars[idx..idx + source.len()].to_vec();
    let mut frame = diff_main(source, &found);
    cleanup_semantic_lossless(&mut frame);

    let mut index1 = 0usize;
    for edit in &patch.diffs {
        let len = edit.char_len();
        match edit {
            Edit::Equal(_) => index1 += len,
            Edit::Insert(text) => {
                let at = (idx + x_index(&frame, index1)).min(chars.len());
                chars.splice(at..at, text.chars());
                index1 += len;
            }
            Edit::Delete(_) => {
                let from = (idx + x_index(&frame, index1)).min(chars.len());
                let to = (idx + x_index(&frame, index1 + len)).clamp(from, chars.len());
                chars.drain(from..to);
                // Deleted source characters are gone from the evolving text;
                // index1 stays so following inserts land at the cut.
            }
        }
    }
}

/// Map a position in a diff's source text to the equivalent position in its
/// target text.
fn x_index(diffs: &[CharDiff], loc: usize) -> usize {
    let mut chars1 = 0usize;
    let mut chars2 = 0usize;
    let mut last1 = 0usize;
    let mut last2 = 0usize;
    let mut hit = None;
    for d in diffs {
        if d.0 != Op::Insert {
            chars1 += d.1.len();
        }
        if d.0 != Op::Delete {
            chars2 += d.1.len();
        }
        if chars1 > loc {
            hit = Some(d.0);
            break;
        }
        last1 = chars1;
        last2 = chars2;
    }
    match hit {
        // The position sits inside a deletion; snap to its start.
        Some(Op::Delete) => last2,
        _ => last2 + (loc - last1),
    }
}

/// Find the best match for `needle` in `haystack` at or near `target`,
/// scanning outward up to [`MATCH_WINDOW`] characters. Prefers the nearest
/// exact match; otherwise accepts the nearest candidate where at most half
/// the characters mismatch. An empty needle matches at the clamped target.
fn locate(haystack: &[char], needle: &[char], target: isize) -> Option<usize> {
    if needle.is_empty() {
        let max = haystack.len() as isize;
        return Some(target.clamp(0, max) as usize);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    let last_start = (haystack.len() - needle.len()) as isize;
    let base = target.clamp(0, last_start);

    let mismatches_at = |idx: isize| -> usize {
        let idx = idx as usize;
        haystack[idx..idx + needle.len()]
            .iter()
            .zip(needle.iter())
            .filter(|(a, b)| a != b)
            .count()
    };

    let mut candidates = Vec::with_capacity(2 * MATCH_WINDOW + 1);
    candidates.push(base);
    for offset in 1..=MATCH_WINDOW as isize {
        candidates.push(base - offset);
        candidates.push(base + offset);
    }

    let mut best: Option<(usize, usize)> = None;
    for cand in candidates {
        if cand < 0 || cand > last_start {
            continue;
        }
        let mismatches = mismatches_at(cand);
        if mismatches == 0 {
            return Some(cand as usize);
        }
        if best.map_or(true, |(b, _)| mismatches < b) {
            best = Some((mismatches, cand as usize));
        }
    }

    best.and_then(|(mismatches, idx)| {
        if mismatches * 2 <= needle.len() {
            Some(idx)
        } else {
            None
        }
    })
}

/// Pad a hunk with [`PATCH_MARGIN`] characters of surrounding context from
/// `text` (the pre-patch state), adjusting its offsets and lengths.
fn add_context(patch: &mut Patch, text: &[char]) {
    if text.is_empty() {
        return;
    }
    let prefix_start = patch.start2.saturating_sub(PATCH_MARGIN);
    let prefix: String = text[prefix_start..patch.start2.min(text.len())]
        .iter()
        .collect();
    let suffix_start = (patch.start2 + patch.length1).min(text.len());
    let suffix_end = (suffix_start + PATCH_MARGIN).min(text.len());
    let suffix: String = text[suffix_start..suffix_end].iter().collect();

    let prefix_len = prefix.chars().count();
    let suffix_len = suffix.chars().count();

    if !prefix.is_empty() {
        patch.diffs.insert(0, Edit::Equal(prefix));
    }
    if !suffix.is_empty() {
        patch.diffs.push(Edit::Equal(suffix));
    }

    patch.start1 -= prefix_len;
    patch.start2 -= prefix_len;
    patch.length1 += prefix_len + suffix_len;
    patch.length2 += prefix_len + suffix_len;
}

fn diff_main(a: &[char], b: &[char]) -> Vec<CharDiff> {
    if a == b {
        if a.is_empty() {
            return Vec::new();
        }
        return vec![(Op::Equal, a.to_vec())];
    }

    let prefix = common_prefix(a, b);
    let a_rest = &a[prefix..];
    let b_rest = &b[prefix..];
    let suffix = common_suffix(a_rest, b_rest);
    let a_mid = &a_rest[..a_rest.len() - suffix];
    let b_mid = &b_rest[..b_rest.len() - suffix];

    let mut diffs = compute(a_mid, b_mid);

    if prefix > 0 {
        diffs.insert(0, (Op::Equal, a[..prefix].to_vec()));
    }
    if suffix > 0 {
        diffs.push((Op::Equal, a[a.len() - suffix..].to_vec()));
    }
    cleanup_merge(&mut diffs);
    diffs
}

fn compute(a: &[char], b: &[char]) -> Vec<CharDiff> {
    if a.is_empty() {
        return vec![(Op::Insert, b.to_vec())];
    }
    if b.is_empty() {
        return vec![(Op::Delete, a.to_vec())];
    }

    let (long, short, a_is_long) = if a.len() > b.len() {
        (a, b, true)
    } else {
        (b, a, false)
    };

    if let Some(i) = find_subsequence(long, short) {
        // The shorter text sits whole inside the longer one.
        let op = if a_is_long { Op::Delete } else { Op::Insert };
        let mut diffs = Vec::new();
        if i > 0 {
            diffs.push((op, long[..i].to_vec()));
        }
        diffs.push((Op::Equal, short.to_vec()));
        if i + short.len() < long.len() {
            diffs.push((op, long[i + short.len()..].to_vec()));
        }
        return diffs;
    }

    if short.len() == 1 {
        // Single char that is not inside the other text.
        return vec![(Op::Delete, a.to_vec()), (Op::Insert, b.to_vec())];
    }

    bisect(a, b)
}

/// Myers bisect: walk the forward and reverse D-paths until they overlap,
/// then split the problem at the overlap and recurse.
fn bisect(a: &[char], b: &[char]) -> Vec<CharDiff> {
    let m = a.len() as isize;
    let n = b.len() as isize;
    let max_d = (m + n + 1) / 2;
    let v_offset = max_d;
    let v_len = (2 * max_d) as usize;
    let mut v1 = vec![-1isize; v_len];
    let mut v2 = vec![-1isize; v_len];
    v1[(v_offset + 1) as usize] = 0;
    v2[(v_offset + 1) as usize] = 0;
    let delta = m - n;
    // With an odd delta the forward path detects the overlap; even, reverse.
    let front = delta % 2 != 0;
    let mut k1start = 0isize;
    let mut k1end = 0isize;
    let mut k2start = 0isize;
    let mut k2end = 0isize;

    for d in 0..max_d {
        let mut k1 = -d + k1start;
        while k1 <= d - k1end {
            let k1_offset = (v_offset + k1) as usize;
            let mut x1 = if k1 == -d || (k1 != d && v1[k1_offset - 1] < v1[k1_offset + 1]) {
                v1[k1_offset + 1]
            } else {
                v1[k1_offset - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < m && y1 < n && a[x1 as usize] == b[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            v1[k1_offset] = x1;
            if x1 > m {
                k1end += 2;
            } else if y1 > n {
                k1start += 2;
            } else if front {
                let k2_offset = v_offset + delta - k1;
                if k2_offset >= 0 && (k2_offset as usize) < v_len && v2[k2_offset as usize] != -1 {
                    let x2 = m - v2[k2_offset as usize];
                    if x1 >= x2 {
                        return bisect_split(a, b, x1 as usize, y1 as usize);
                    }
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2start;
        while k2 <= d - k2end {
            let k2_offset = (v_offset + k2) as usize;
            let mut x2 = if k2 == -d || (k2 != d && v2[k2_offset - 1] < v2[k2_offset + 1]) {
                v2[k2_offset + 1]
            } else {
                v2[k2_offset - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < m && y2 < n && a[(m - x2 - 1) as usize] == b[(n - y2 - 1) as usize] {
                x2 += 1;
                y2 += 1;
            }
            v2[k2_offset] = x2;
            if x2 > m {
                k2end += 2;
            } else if y2 > n {
                k2start += 2;
            } else if !front {
                let k1_offset = v_offset + delta - k2;
                if k1_offset >= 0 && (k1_offset as usize) < v_len && v1[k1_offset as usize] != -1 {
                    let x1 = v1[k1_offset as usize];
                    let y1 = v_offset + x1 - k1_offset;
                    let x2 = m - x2;
                    if x1 >= x2 {
                        return bisect_split(a, b, x1 as usize, y1 as usize);
                    }
                }
            }
            k2 += 2;
        }
    }

    // No commonality at all.
    vec![(Op::Delete, a.to_vec()), (Op::Insert, b.to_vec())]
}

fn bisect_split(a: &[char], b: &[char], x: usize, y: usize) -> Vec<CharDiff> {
    let mut diffs = diff_main(&a[..x], &b[..y]);
    diffs.extend(diff_main(&a[x..], &b[y..]));
    diffs
}

fn find_subsequence(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Merge adjacent ops of the same kind, factor shared prefixes/suffixes out
/// of delete/insert pairs into the neighbouring equalities, and drop empties.
fn cleanup_merge(diffs: &mut Vec<CharDiff>) {
    if diffs.is_empty() {
        return;
    }
    diffs.push((Op::Equal, Vec::new())); // sentinel

    let mut pointer = 0usize;
    let mut count_delete = 0usize;
    let mut count_insert = 0usize;
    let mut text_delete: Vec<char> = Vec::new();
    let mut text_insert: Vec<char> = Vec::new();

    while pointer < diffs.len() {
        match diffs[pointer].0 {
            Op::Insert => {
                count_insert += 1;
                text_insert.extend(diffs[pointer].1.iter());
                pointer += 1;
            }
            Op::Delete => {
                count_delete += 1;
                text_delete.extend(diffs[pointer].1.iter());
                pointer += 1;
            }
            Op::Equal => {
                if count_delete + count_insert > 1 {
                    if count_delete != 0 && count_insert != 0 {
                        let prefix = common_prefix(&text_insert, &text_delete);
                        if prefix > 0 {
                            let first = pointer - count_delete - count_insert;
                            if first > 0 && diffs[first - 1].0 == Op::Equal {
                                let shared: Vec<char> = text_insert[..prefix].to_vec();
                                diffs[first - 1].1.extend(shared);
                            } else {
                                diffs.insert(0, (Op::Equal, text_insert[..prefix].to_vec()));
                                pointer += 1;
                            }
                            text_insert.drain(..prefix);
                            text_delete.drain(..prefix);
                        }
                        let suffix = common_suffix(&text_insert, &text_delete);
                        if suffix > 0 {
                            let mut shared: Vec<char> =
                                text_insert[text_insert.len() - suffix..].to_vec();
                            shared.extend(diffs[pointer].1.iter());
                            diffs[pointer].1 = shared;
                            text_insert.truncate(text_insert.len() - suffix);
                            text_delete.truncate(text_delete.len() - suffix);
                        }
                    }
                    let first = pointer - count_delete - count_insert;
                    let mut replacement = Vec::new();
                    if !text_delete.is_empty() {
                        replacement.push((Op::Delete, std::mem::take(&mut text_delete)));
                    }
                    if !text_insert.is_empty() {
                        replacement.push((Op::Insert, std::mem::take(&mut text_insert)));
                    }
                    let inserted = replacement.len();
                    diffs.splice(first..pointer, replacement);
                    pointer = first + inserted + 1;
                } else if pointer != 0 && diffs[pointer - 1].0 == Op::Equal {
                    let current = std::mem::take(&mut diffs[pointer].1);
                    diffs[pointer - 1].1.extend(current);
                    diffs.remove(pointer);
                } else {
                    pointer += 1;
                }
                count_delete = 0;
                count_insert = 0;
                text_delete.clear();
                text_insert.clear();
            }
        }
    }

    if let Some(last) = diffs.last() {
        if last.0 == Op::Equal && last.1.is_empty() {
            diffs.pop();
        }
    }
    diffs.retain(|(_, text)| !text.is_empty());

    // Single edits surrounded by equalities can sometimes be shifted to
    // eliminate one of the equalities (A<ins>BA</ins>C -> <ins>AB</ins>AC).
    let mut changes = false;
    let mut pointer = 1usize;
    while pointer + 1 < diffs.len() {
        if diffs[pointer - 1].0 == Op::Equal && diffs[pointer + 1].0 == Op::Equal {
            let prev = diffs[pointer - 1].1.clone();
            let next = diffs[pointer + 1].1.clone();
            let edit = diffs[pointer].1.clone();
            if edit.len() >= prev.len() && edit[edit.len() - prev.len()..] == prev[..] {
                let mut shifted = prev.clone();
                shifted.extend(edit[..edit.len() - prev.len()].iter());
                diffs[pointer].1 = shifted;
                let mut merged = prev.clone();
                merged.extend(next.iter());
                diffs[pointer + 1].1 = merged;
                diffs.remove(pointer - 1);
                changes = true;
            } else if edit.len() >= next.len() && edit[..next.len()] == next[..] {
                diffs[pointer - 1].1.extend(next.iter());
                let mut shifted: Vec<char> = edit[next.len()..].to_vec();
                shifted.extend(next.iter());
                diffs[pointer].1 = shifted;
                diffs.remove(pointer + 1);
                changes = true;
            } else {
                pointer += 1;
            }
        } else {
            pointer += 1;
        }
    }
    if changes {
        cleanup_merge(diffs);
    }
}

/// Slide edit boundaries to word/line boundaries where the move is free.
/// "The c<ins>at c</ins>ame" becomes "The <ins>cat </ins>came".
fn cleanup_semantic_lossless(diffs: &mut Vec<CharDiff>) {
    let mut pointer = 1usize;
    while pointer + 1 < diffs.len() {
        if diffs[pointer - 1].0 == Op::Equal && diffs[pointer + 1].0 == Op::Equal {
            let mut equality1 = diffs[pointer - 1].1.clone();
            let mut edit = diffs[pointer].1.clone();
            let mut equality2 = diffs[pointer + 1].1.clone();

            // Shift as far left as possible first.
            let offset = common_suffix(&equality1, &edit);
            if offset > 0 {
                let shared: Vec<char> = edit[edit.len() - offset..].to_vec();
                equality1.truncate(equality1.len() - offset);
                let mut new_edit = shared.clone();
                new_edit.extend(edit[..edit.len() - offset].iter());
                edit = new_edit;
                let mut new_eq2 = shared;
                new_eq2.extend(equality2.iter());
                equality2 = new_eq2;
            }

            let mut best_equality1 = equality1.clone();
            let mut best_edit = edit.clone();
            let mut best_equality2 = equality2.clone();
            let mut best_score =
                boundary_score(&equality1, &edit) + boundary_score(&edit, &equality2);

            while !edit.is_empty() && !equality2.is_empty() && edit[0] == equality2[0] {
                equality1.push(edit[0]);
                edit.remove(0);
                edit.push(equality2[0]);
                equality2.remove(0);
                let score = boundary_score(&equality1, &edit) + boundary_score(&edit, &equality2);
                // >= favours trailing boundaries over leading ones.
                if score >= best_score {
                    best_score = score;
                    best_equality1 = equality1.clone();
                    best_edit = edit.clone();
                    best_equality2 = equality2.clone();
                }
            }

            if diffs[pointer - 1].1 != best_equality1 {
                if !best_equality1.is_empty() {
                    diffs[pointer - 1].1 = best_equality1;
                } else {
                    diffs.remove(pointer - 1);
                    pointer -= 1;
                }
                diffs[pointer].1 = best_edit;
                if !best_equality2.is_empty() {
                    diffs[pointer + 1].1 = best_equality2;
                } else {
                    diffs.remove(pointer + 1);
                }
            }
        }
        pointer += 1;
    }
}

/// Score the boundary between two texts; higher is a more natural split.
fn boundary_score(one: &[char], two: &[char]) -> i32 {
    if one.is_empty() || two.is_empty() {
        return 6;
    }
    let char1 = one[one.len() - 1];
    let char2 = two[0];
    let non_alnum1 = !char1.is_alphanumeric();
    let non_alnum2 = !char2.is_alphanumeric();
    let whitespace1 = non_alnum1 && char1.is_whitespace();
    let whitespace2 = non_alnum2 && char2.is_whitespace();
    let line_break1 = whitespace1 && (char1 == '\n' || char1 == '\r');
    let line_break2 = whitespace2 && (char2 == '\n' || char2 == '\r');
    let blank_line1 = line_break1 && ends_with_blank_line(one);
    let blank_line2 = line_break2 && starts_with_blank_line(two);

    if blank_line1 || blank_line2 {
        5
    } else if line_break1 || line_break2 {
        4
    } else if non_alnum1 && !whitespace1 && whitespace2 {
        3
    } else if whitespace1 || whitespace2 {
        2
    } else if non_alnum1 || non_alnum2 {
        1
    } else {
        0
    }
}

fn ends_with_blank_line(text: &[char]) -> bool {
    let s: String = text.iter().rev().take(3).collect::<String>();
    let tail: String = s.chars().rev().collect();
    tail.ends_with("\n\n") || tail.ends_with("\n\r\n")
}

fn starts_with_blank_line(text: &[char]) -> bool {
    let head: String = text.iter().take(3).collect();
    head.starts_with("\n\n") || head.starts_with("\r\n\n") || head.starts_with("\n\r\n")
}
