use crate::location::Location;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GapError {
    /// The new gap's location overlaps the gap already accepted at `existing`.
    #[error("Gap location {location} overlaps the location of gap #{existing}")]
    Overlap { location: String, existing: usize },
}

/// An injection point together with its candidate payload literals.
///
/// The payload list may be edited freely until the gap is handed to a
/// fuzz run. An empty list is allowed and makes the whole run a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct Gap<L: Location> {
    location: L,
    payloads: Vec<String>,
}

impl<L: Location> Gap<L> {
    pub fn new(location: L) -> Self {
        Self {
            location,
            payloads: Vec::new(),
        }
    }

    pub fn with_payloads<I, S>(location: L, payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            location,
            payloads: payloads.into_iter().map(Into::into).collect(),
        }
    }

    pub fn location(&self) -> &L {
        &self.location
    }

    pub fn payloads(&self) -> &[String] {
        &self.payloads
    }

    pub fn push_payload(&mut self, payload: impl Into<String>) {
        self.payloads.push(payload.into());
    }

    pub fn extend_payloads<I, S>(&mut self, payloads: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payloads.extend(payloads.into_iter().map(Into::into));
    }

    pub fn clear_payloads(&mut self) {
        self.payloads.clear();
    }

    pub fn cardinality(&self) -> usize {
        self.payloads.len()
    }
}

/// The ordered gaps of one fuzz run, guaranteed pairwise non-overlapping.
#[derive(Debug, Clone, PartialEq)]
pub struct GapSet<L: Location> {
    gaps: Vec<Gap<L>>,
}

impl<L: Location> Default for GapSet<L> {
    fn default() -> Self {
        Self { gaps: Vec::new() }
    }
}

impl<L: Location> GapSet<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `gap`, refusing it if its location overlaps an accepted one.
    pub fn push(&mut self, gap: Gap<L>) -> Result<usize, GapError> {
        if let Some(existing) = self
            .gaps
            .iter()
            .position(|accepted| accepted.location.overlaps(&gap.location))
        {
            return Err(GapError::Overlap {
                location: format!("{:?}", gap.location),
                existing,
            });
        }
        self.gaps.push(gap);
        Ok(self.gaps.len() - 1)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Gap<L>> {
        self.gaps.get_mut(index)
    }

    pub fn as_slice(&self) -> &[Gap<L>] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Gap<L>> {
        self.gaps.iter()
    }
}

impl<L: Location> TryFrom<Vec<Gap<L>>> for GapSet<L> {
    type Error = GapError;

    fn try_from(gaps: Vec<Gap<L>>) -> Result<Self, Self::Error> {
        let mut set = GapSet::new();
        for gap in gaps {
            set.push(gap)?;
        }
        Ok(set)
    }
}

/// One combination: the literal chosen for every gap, in gap order.
///
/// Built by the scheduler for exactly one combination index and consumed by
/// the process created for it. There is no way to modify it after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionMap<L: Location> {
    entries: Vec<(L, String)>,
}

impl<L: Location> SubstitutionMap<L> {
    pub(crate) fn from_entries(entries: Vec<(L, String)>) -> Self {
        Self { entries }
    }

    /// Literal chosen for `location`, if it is one of the run's gaps.
    pub fn get(&self, location: &L) -> Option<&str> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == location)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&L, &str)> {
        self.entries
            .iter()
            .map(|(location, value)| (location, value.as_str()))
    }

    /// The chosen literals in gap order.
    pub fn values(&self) -> Vec<String> {
        self.entries.iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Span;

    #[test]
    fn gap_payload_list_is_mutable_before_the_run() {
        let mut gap = Gap::new(Span::new(0, 3));
        assert_eq!(gap.cardinality(), 0);
        gap.push_payload("a");
        gap.extend_payloads(["b", "c"]);
        assert_eq!(gap.payloads(), ["a", "b", "c"]);
        assert_eq!(gap.cardinality(), 3);
        gap.clear_payloads();
        assert_eq!(gap.cardinality(), 0);
    }

    #[test]
    fn gap_set_rejects_overlapping_locations() {
        let mut set = GapSet::new();
        assert_eq!(set.push(Gap::new(Span::new(0, 4))), Ok(0));
        assert_eq!(set.push(Gap::new(Span::new(10, 12))), Ok(1));

        let err = set.push(Gap::new(Span::new(11, 15))).unwrap_err();
        assert_eq!(
            err,
            GapError::Overlap {
                location: format!("{:?}", Span::new(11, 15)),
                existing: 1,
            }
        );
        assert_eq!(set.len(), 2, "rejected gap must not be stored");
    }

    #[test]
    fn gap_set_try_from_vec() {
        let ok: Result<GapSet<Span>, _> = vec![
            Gap::with_payloads(Span::new(0, 1), ["x"]),
            Gap::with_payloads(Span::new(1, 2), ["y"]),
        ]
        .try_into();
        assert_eq!(ok.unwrap().len(), 2);

        let clash: Result<GapSet<Span>, _> = vec![
            Gap::new(Span::new(0, 5)),
            Gap::new(Span::new(2, 3)),
        ]
        .try_into();
        assert!(clash.is_err());
    }

    #[test]
    fn substitution_map_lookup() {
        let map = SubstitutionMap::from_entries(vec![
            (Span::new(0, 1), "A1".to_string()),
            (Span::new(5, 6), "B0".to_string()),
        ]);
        assert_eq!(map.get(&Span::new(5, 6)), Some("B0"));
        assert_eq!(map.get(&Span::new(2, 3)), None);
        assert_eq!(map.values(), vec!["A1", "B0"]);
        assert_eq!(map.len(), 2);
        let locations: Vec<_> = map.iter().map(|(l, _)| *l).collect();
        assert_eq!(locations, vec![Span::new(0, 1), Span::new(5, 6)]);
    }
}
