//! Speaker/text timeline merge
//!
//! Fuses the speaker pass (authoritative labels and times, poor text) with
//! the text pass (authoritative text) by walking the timeline and attributing
//! each text segment to the speaker interval(s) it overlaps. Times between
//! the two passes drift by a few percent; attribution therefore works by
//! overlap, never by exact equality.

use crate::domain::models::Segment;

/// Merge text segments against speaker intervals.
///
/// For each text segment: a single overlapping speaker interval attributes
/// the whole segment; multiple overlaps split the segment's tokens
/// proportionally to the covered fraction; no overlap attributes to the
/// nearest interval in time. Speaker ids are renumbered densely from 0 in
/// order of first appearance.
pub fn merge_speaker_text(speakers: &[Segment], texts: &[Segment]) -> Vec<Segment> {
    if speakers.is_empty() {
        return renumber_speakers(texts.to_vec());
    }

    let mut merged: Vec<Segment> = Vec::with_capacity(texts.len());

    for text_segment in texts {
        if text_segment.text.trim().is_empty() {
            continue;
        }

        let overlapping: Vec<&Segment> = speakers
            .iter()
            .filter(|s| overlap_ms(s, text_segment) > 0)
            .collect();

        match overlapping.len() {
            0 => {
                let nearest = nearest_interval(speakers, text_segment);
                merged.push(Segment::new(
                    nearest.speaker_id,
                    text_segment.text.trim(),
                    text_segment.start_ms,
                    text_segment.end_ms,
                ));
            }
            1 => {
                merged.push(Segment::new(
                    overlapping[0].speaker_id,
                    text_segment.text.trim(),
                    text_segment.start_ms,
                    text_segment.end_ms,
                ));
            }
            _ => {
                merged.extend(split_proportionally(text_segment, &overlapping));
            }
        }
    }

    renumber_speakers(merged)
}

/// Overlap in milliseconds between two half-open intervals
fn overlap_ms(a: &Segment, b: &Segment) -> i64 {
    (a.end_ms.min(b.end_ms) - a.start_ms.max(b.start_ms)).max(0)
}

/// Distance in milliseconds between two disjoint intervals
fn distance_ms(a: &Segment, b: &Segment) -> i64 {
    if a.end_ms <= b.start_ms {
        b.start_ms - a.end_ms
    } else if b.end_ms <= a.start_ms {
        a.start_ms - b.end_ms
    } else {
        0
    }
}

fn nearest_interval<'a>(speakers: &'a [Segment], text: &Segment) -> &'a Segment {
    speakers
        .iter()
        .min_by_key(|s| distance_ms(s, text))
        .expect("speakers is non-empty")
}

/// Distribute a text segment's tokens across several overlapping speaker
/// intervals by the fraction of the segment each interval covers.
fn split_proportionally(text_segment: &Segment, overlapping: &[&Segment]) -> Vec<Segment> {
    let tokens: Vec<&str> = text_segment.text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let total_overlap: i64 = overlapping.iter().map(|s| overlap_ms(s, text_segment)).sum();
    if total_overlap == 0 {
        return vec![Segment::new(
            overlapping[0].speaker_id,
            text_segment.text.trim(),
            text_segment.start_ms,
            text_segment.end_ms,
        )];
    }

    let mut result = Vec::with_capacity(overlapping.len());
    let mut consumed_tokens = 0usize;
    let mut consumed_overlap = 0i64;

    for (i, speaker) in overlapping.iter().enumerate() {
        consumed_overlap += overlap_ms(speaker, text_segment);
        // Cumulative rounding keeps the total exactly equal to token count
        let boundary = if i == overlapping.len() - 1 {
            tokens.len()
        } else {
            ((consumed_overlap as f64 / total_overlap as f64) * tokens.len() as f64).round()
                as usize
        };
        let boundary = boundary.clamp(consumed_tokens, tokens.len());

        if boundary > consumed_tokens {
            let slice = tokens[consumed_tokens..boundary].join(" ");
            result.push(Segment::new(
                speaker.speaker_id,
                &slice,
                text_segment.start_ms.max(speaker.start_ms),
                text_segment.end_ms.min(speaker.end_ms),
            ));
            consumed_tokens = boundary;
        }
    }

    result
}

/// Renumber speaker ids densely from 0 in order of first appearance
pub fn renumber_speakers(segments: Vec<Segment>) -> Vec<Segment> {
    let mut mapping: Vec<u32> = Vec::new();
    segments
        .into_iter()
        .map(|mut segment| {
            let dense = match mapping.iter().position(|&id| id == segment.speaker_id) {
                Some(index) => index as u32,
                None => {
                    mapping.push(segment.speaker_id);
                    (mapping.len() - 1) as u32
                }
            };
            segment.speaker_id = dense;
            segment
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{speaker_transitions, unique_speakers};

    fn spk(id: u32, start: i64, end: i64) -> Segment {
        Segment::new(id, "", start, end)
    }

    #[test]
    fn test_single_overlap_direct_attribution() {
        let speakers = vec![spk(0, 0, 120_000)];
        let texts = vec![
            Segment::new(0, "Lorem", 0, 60_000),
            Segment::new(0, "ipsum", 60_000, 120_000),
        ];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|s| s.speaker_id == 0));
        assert_eq!(merged[0].text, "Lorem");
        assert_eq!(merged[1].text, "ipsum");
    }

    #[test]
    fn test_proportional_split_on_speaker_change() {
        // Speaker change in the middle of one text span: tokens distribute
        // by covered fraction
        let speakers = vec![spk(0, 0, 5_000), spk(1, 5_000, 10_000)];
        let texts = vec![Segment::new(
            0,
            "alpha beta gamma delta epsilon zeta",
            0,
            10_000,
        )];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].speaker_id, 0);
        assert_eq!(merged[0].text, "alpha beta gamma");
        assert_eq!(merged[1].speaker_id, 1);
        assert_eq!(merged[1].text, "delta epsilon zeta");
        assert_eq!(speaker_transitions(&merged), 1);
    }

    #[test]
    fn test_uneven_proportional_split() {
        // 80/20 coverage over 5 tokens → 4 + 1
        let speakers = vec![spk(0, 0, 8_000), spk(1, 8_000, 10_000)];
        let texts = vec![Segment::new(0, "one two three four five", 0, 10_000)];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "one two three four");
        assert_eq!(merged[1].text, "five");
    }

    #[test]
    fn test_no_overlap_attributes_to_nearest() {
        let speakers = vec![spk(3, 0, 1_000), spk(7, 10_000, 12_000)];
        let texts = vec![Segment::new(0, "orphan words", 8_000, 9_500)];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged.len(), 1);
        // Nearest interval is the second one (500ms vs 7000ms), renumbered:
        // first appearance of raw id 7 becomes dense id 0
        assert_eq!(merged[0].speaker_id, 0);
        assert_eq!(merged[0].text, "orphan words");
    }

    #[test]
    fn test_renumbering_dense_by_first_appearance() {
        let segments = vec![
            Segment::new(5, "a", 0, 1_000),
            Segment::new(2, "b", 1_000, 2_000),
            Segment::new(5, "c", 2_000, 3_000),
            Segment::new(9, "d", 3_000, 4_000),
        ];
        let renumbered = renumber_speakers(segments);
        let ids: Vec<u32> = renumbered.iter().map(|s| s.speaker_id).collect();
        assert_eq!(ids, vec![0, 1, 0, 2]);
        assert_eq!(unique_speakers(&renumbered), 3);
    }

    #[test]
    fn test_single_speaker_fixed_point() {
        // Re-merging single-speaker output against its own timing reproduces
        // the input: the proportional branch reduces to direct attribution
        let speakers = vec![spk(0, 0, 10_000)];
        let texts = vec![
            Segment::new(0, "first sentence", 0, 4_000),
            Segment::new(0, "second sentence", 4_000, 10_000),
        ];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged, texts);

        let remerged = merge_speaker_text(&speakers, &merged);
        assert_eq!(remerged, merged);
    }

    #[test]
    fn test_empty_text_segments_are_skipped() {
        let speakers = vec![spk(0, 0, 10_000)];
        let texts = vec![
            Segment::new(0, "  ", 0, 2_000),
            Segment::new(0, "kept", 2_000, 4_000),
        ];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "kept");
    }

    #[test]
    fn test_empty_speakers_pass_through() {
        let texts = vec![Segment::new(4, "hello", 0, 1_000)];
        let merged = merge_speaker_text(&[], &texts);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].speaker_id, 0);
    }

    #[test]
    fn test_drifted_timelines_still_attribute() {
        // Pass timelines disagree by ~3%: overlap attribution tolerates it
        let speakers = vec![spk(0, 0, 5_150), spk(1, 5_150, 10_300)];
        let texts = vec![
            Segment::new(0, "hello there", 0, 5_000),
            Segment::new(0, "general kenobi", 5_000, 10_000),
        ];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].speaker_id, 0);
        // Second text overlaps both intervals but nearly all of it is
        // covered by speaker 1: proportional split leaves speaker 0 empty
        assert_eq!(merged[1].speaker_id, 1);
        assert_eq!(merged[1].text, "general kenobi");
    }

    #[test]
    fn test_three_way_split() {
        let speakers = vec![spk(0, 0, 3_000), spk(1, 3_000, 6_000), spk(2, 6_000, 9_000)];
        let texts = vec![Segment::new(0, "a b c d e f g h i", 0, 9_000)];
        let merged = merge_speaker_text(&speakers, &texts);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].text, "a b c");
        assert_eq!(merged[1].text, "d e f");
        assert_eq!(merged[2].text, "g h i");
        let total_tokens: usize = merged
            .iter()
            .map(|s| s.text.split_whitespace().count())
            .sum();
        assert_eq!(total_tokens, 9);
    }
}
