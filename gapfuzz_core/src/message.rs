use crate::gap::{Gap, GapError, GapSet, SubstitutionMap};
use crate::location::Span;
use thiserror::Error;

pub const DEFAULT_MARKER: &str = "§";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Gap marker {marker:?} at byte {offset} has no closing marker")]
    UnpairedMarker { marker: String, offset: usize },
    #[error("Gap marker must not be empty")]
    EmptyMarker,
    #[error("Gap {span} is outside a message of {len} bytes")]
    OutOfBounds { span: Span, len: usize },
    #[error("Gap {0} does not fall on character boundaries")]
    NotCharBoundary(Span),
    #[error(transparent)]
    Gap(#[from] GapError),
}

/// A text message with marked gaps.
///
/// In the template every gap is written as `<marker>default<marker>`. The
/// parsed message keeps the text with the markers removed and one byte
/// [`Span`] per gap, pointing at the default text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedMessage {
    text: String,
    gaps: Vec<Span>,
}

impl MarkedMessage {
    pub fn parse(template: &str, marker: &str) -> Result<Self, MessageError> {
        if marker.is_empty() {
            return Err(MessageError::EmptyMarker);
        }

        let mut text = String::with_capacity(template.len());
        let mut gaps = Vec::new();
        let mut open: Option<(usize, usize)> = None;
        let mut rest = template;
        let mut consumed = 0;

        while let Some(pos) = rest.find(marker) {
            text.push_str(&rest[..pos]);
            match open.take() {
                None => open = Some((consumed + pos, text.len())),
                Some((_, start)) => gaps.push(Span::new(start, text.len())),
            }
            consumed += pos + marker.len();
            rest = &rest[pos + marker.len()..];
        }
        text.push_str(rest);

        if let Some((offset, _)) = open {
            return Err(MessageError::UnpairedMarker {
                marker: marker.to_string(),
                offset,
            });
        }

        log::debug!("Parsed message template: {} gaps", gaps.len());
        Ok(Self { text, gaps })
    }

    /// The message with markers removed and default values in place.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn gaps(&self) -> &[Span] {
        &self.gaps
    }

    /// Default text of a gap.
    pub fn original(&self, span: &Span) -> Option<&str> {
        self.text.get(span.start..span.end)
    }

    /// One gap per marked location, in template order, with no payloads yet.
    pub fn gap_set(&self) -> Result<GapSet<Span>, MessageError> {
        let gaps: Vec<Gap<Span>> = self.gaps.iter().copied().map(Gap::new).collect();
        Ok(GapSet::try_from(gaps)?)
    }

    /// Substitutes every location in `substitutions` into the text. Gaps not
    /// named in the map keep their default text.
    pub fn render(&self, substitutions: &SubstitutionMap<Span>) -> Result<String, MessageError> {
        let mut edits: Vec<(Span, &str)> = substitutions
            .iter()
            .map(|(span, value)| (*span, value))
            .collect();
        for (span, _) in &edits {
            self.check_span(span)?;
        }
        edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));

        let mut rendered = self.text.clone();
        for (span, value) in edits {
            rendered.replace_range(span.start..span.end, value);
        }
        Ok(rendered)
    }

    fn check_span(&self, span: &Span) -> Result<(), MessageError> {
        if span.start > span.end || span.end > self.text.len() {
            return Err(MessageError::OutOfBounds {
                span: *span,
                len: self.text.len(),
            });
        }
        if !self.text.is_char_boundary(span.start) || !self.text.is_char_boundary(span.end) {
            return Err(MessageError::NotCharBoundary(*span));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = "user=§admin§&pass=§secret§";

    fn map(entries: &[(Span, &str)]) -> SubstitutionMap<Span> {
        SubstitutionMap::from_entries(
            entries
                .iter()
                .map(|(span, value)| (*span, value.to_string()))
                .collect(),
        )
    }

    #[test]
    fn parse_strips_markers_and_records_gaps() {
        let msg = MarkedMessage::parse(LOGIN, DEFAULT_MARKER).unwrap();
        assert_eq!(msg.text(), "user=admin&pass=secret");
        assert_eq!(msg.gaps(), [Span::new(5, 10), Span::new(16, 22)]);
        assert_eq!(msg.original(&msg.gaps()[0]), Some("admin"));
        assert_eq!(msg.original(&msg.gaps()[1]), Some("secret"));
    }

    #[test]
    fn parse_handles_empty_and_adjacent_gaps() {
        let msg = MarkedMessage::parse("a$$b$x$$y$", "$").unwrap();
        assert_eq!(msg.text(), "abxy");
        assert_eq!(
            msg.gaps(),
            [Span::new(1, 1), Span::new(2, 3), Span::new(3, 4)]
        );
        assert_eq!(msg.gap_set().unwrap().len(), 3);
    }

    #[test]
    fn parse_without_markers_has_no_gaps() {
        let msg = MarkedMessage::parse("GET / HTTP/1.1", DEFAULT_MARKER).unwrap();
        assert_eq!(msg.text(), "GET / HTTP/1.1");
        assert!(msg.gaps().is_empty());
    }

    #[test]
    fn parse_rejects_bad_markers() {
        assert_eq!(
            MarkedMessage::parse("id=§1§&x=§2", DEFAULT_MARKER),
            Err(MessageError::UnpairedMarker {
                marker: DEFAULT_MARKER.to_string(),
                offset: "id=§1§&x=".len(),
            })
        );
        assert_eq!(
            MarkedMessage::parse("abc", ""),
            Err(MessageError::EmptyMarker)
        );
    }

    #[test]
    fn coinciding_insertion_points_are_rejected_as_gaps() {
        let msg = MarkedMessage::parse("a||||b", "|").unwrap();
        assert_eq!(msg.gaps(), [Span::new(1, 1), Span::new(1, 1)]);
        assert!(matches!(
            msg.gap_set(),
            Err(MessageError::Gap(GapError::Overlap { existing: 0, .. }))
        ));
    }

    #[test]
    fn render_substitutes_right_to_left() {
        let msg = MarkedMessage::parse(LOGIN, DEFAULT_MARKER).unwrap();
        let rendered = msg
            .render(&map(&[
                (Span::new(5, 10), "' OR 1=1 --"),
                (Span::new(16, 22), "x"),
            ]))
            .unwrap();
        assert_eq!(rendered, "user=' OR 1=1 --&pass=x");
    }

    #[test]
    fn render_keeps_defaults_for_missing_gaps() {
        let msg = MarkedMessage::parse(LOGIN, DEFAULT_MARKER).unwrap();
        let rendered = msg.render(&map(&[(Span::new(16, 22), "")])).unwrap();
        assert_eq!(rendered, "user=admin&pass=");
    }

    #[test]
    fn render_rejects_invalid_spans() {
        let msg = MarkedMessage::parse("héllo §x§", DEFAULT_MARKER).unwrap();
        assert_eq!(
            msg.render(&map(&[(Span::new(40, 41), "y")])),
            Err(MessageError::OutOfBounds {
                span: Span::new(40, 41),
                len: msg.text().len(),
            })
        );
        assert_eq!(
            msg.render(&map(&[(Span::new(2, 3), "y")])),
            Err(MessageError::NotCharBoundary(Span::new(2, 3)))
        );
    }
}
