//! Splitting of declarations that exceed the token budget.
//!
//! A span is cut into consecutive pieces at preferred boundaries (statement
//! starts), then at line starts, then at character boundaries, and the
//! resulting segments are packed greedily so each piece fits its budget.
//! The pieces always partition the original span exactly.

use super::estimate_tokens;
use crate::model::Span;

/// Cut `span` into consecutive pieces.
///
/// `first_budget` applies to the first piece, `rest_budget` to every later
/// piece (continuations carry a header, so they get less room). Every piece
/// holds at least one segment, so progress is guaranteed even when a single
/// segment cannot fit.
pub(crate) fn plan_pieces(
    source: &str,
    span: Span,
    boundaries: &[usize],
    first_budget: usize,
    rest_budget: usize,
) -> Vec<Span> {
    let limit = first_budget.min(rest_budget).max(1);
    let mut segments: Vec<(Span, usize)> = Vec::new();

    for segment in segment_span(source, &span, boundaries) {
        let tokens = estimate_tokens(&source[segment.clone()]);
        if tokens <= limit {
            segments.push((segment, tokens));
            continue;
        }
        // Too large on its own: fall back to lines, then characters
        for line in segment_span(source, &segment, &line_starts(source, &segment)) {
            let tokens = estimate_tokens(&source[line.clone()]);
            if tokens <= limit {
                segments.push((line, tokens));
            } else {
                for piece in hard_cut(source, &line, limit) {
                    let tokens = estimate_tokens(&source[piece.clone()]);
                    segments.push((piece, tokens));
                }
            }
        }
    }

    pack(segments, first_budget, rest_budget)
}

/// Greedy packing of adjacent segments
fn pack(segments: Vec<(Span, usize)>, first_budget: usize, rest_budget: usize) -> Vec<Span> {
    let mut pieces: Vec<Span> = Vec::new();
    let mut current: Option<(Span, usize)> = None;

    for (segment, tokens) in segments {
        current = match current.take() {
            None => Some((segment, tokens)),
            Some((span, used)) => {
                let budget = if pieces.is_empty() {
                    first_budget
                } else {
                    rest_budget
                };
                if used + tokens <= budget {
                    Some((span.start..segment.end, used + tokens))
                } else {
                    pieces.push(span);
                    Some((segment, tokens))
                }
            }
        };
    }
    if let Some((span, _)) = current {
        pieces.push(span);
    }
    pieces
}

/// Consecutive ranges of `span` separated at every boundary strictly inside it
fn segment_span(source: &str, span: &Span, boundaries: &[usize]) -> Vec<Span> {
    let mut cuts: Vec<usize> = boundaries
        .iter()
        .copied()
        .filter(|&b| b > span.start && b < span.end && source.is_char_boundary(b))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut out = Vec::with_capacity(cuts.len() + 1);
    let mut start = span.start;
    for cut in cuts {
        out.push(start..cut);
        start = cut;
    }
    out.push(start..span.end);
    out
}

/// Byte offsets of line starts inside `span` (excluding its start)
pub(crate) fn line_starts(source: &str, span: &Span) -> Vec<usize> {
    source[span.clone()]
        .match_indices('\n')
        .map(|(i, _)| span.start + i + 1)
        .filter(|&b| b < span.end)
        .collect()
}

/// Fixed-width cut for a single line that cannot fit; roughly three bytes
/// per token keeps each piece under budget for typical code.
fn hard_cut(source: &str, span: &Span, budget: usize) -> Vec<Span> {
    let width = (budget * 3).max(1);
    let mut out = Vec::new();
    let mut start = span.start;
    while start < span.end {
        let mut end = (start + width).min(span.end);
        while end < span.end && !source.is_char_boundary(end) {
            end += 1;
        }
        out.push(start..end);
        start = end;
    }
    out
}

/// Offset where a statement's line begins, when only indentation precedes it
pub(crate) fn line_aligned(source: &str, offset: usize) -> usize {
    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    if source[line_start..offset].trim().is_empty() {
        line_start
    } else {
        offset
    }
}
