use crate::error::ParseError;
use crate::marker::{Group, groups_from_end, nth_from_end};

pub const EXOTIC_NATURALIZED: &str = "Exotic: Naturalized";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameShape {
    ExoticNaturalized { scientific_from_end: usize },
    SingleGroup,
    MultiGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesName {
    pub common: String,
    pub scientific: String,
    pub shape: NameShape,
}

pub fn classify_shape(line: &str, groups: &[Group<'_>]) -> Result<NameShape, ParseError> {
    if line.contains(EXOTIC_NATURALIZED) {
        let qualifier = groups
            .iter()
            .position(|g| g.inner == EXOTIC_NATURALIZED)
            .ok_or_else(|| disambiguation(line, "qualifier is not a parenthetical group"))?;
        return Ok(NameShape::ExoticNaturalized {
            scientific_from_end: qualifier + 1,
        });
    }

    match groups.len() {
        0 => Err(disambiguation(line, "no parenthetical group")),
        1 => Ok(NameShape::SingleGroup),
        _ => Ok(NameShape::MultiGroup),
    }
}

pub fn disambiguate(line: &str) -> Result<SpeciesName, ParseError> {
    let line = line.trim();
    let mut groups = groups_from_end(line);
    if groups.first().is_some_and(|g| is_count(g.inner)) {
        groups.remove(0);
    }

    let shape = classify_shape(line, &groups)?;
    let scientific_group = match shape {
        NameShape::ExoticNaturalized {
            scientific_from_end,
        } => nth_from_end(&groups, scientific_from_end),
        NameShape::SingleGroup | NameShape::MultiGroup => nth_from_end(&groups, 0),
    }
    .ok_or_else(|| disambiguation(line, "required parenthetical group is missing"))?;

    // Annotation groups sit between the common name and the scientific name.
    let first_open = groups.last().map_or(scientific_group.open, |g| g.open);
    let mut common = line[..first_open].trim().to_string();
    if matches!(shape, NameShape::ExoticNaturalized { .. }) {
        common.push_str(" (");
        common.push_str(EXOTIC_NATURALIZED);
        common.push(')');
    }

    let scientific = scientific_group.inner.to_string();
    if common.is_empty() || scientific.is_empty() {
        return Err(disambiguation(line, "empty common or scientific name"));
    }

    Ok(SpeciesName {
        common,
        scientific,
        shape,
    })
}

/// eBird appends the number of birds seen, or `X` when uncounted.
fn is_count(inner: &str) -> bool {
    inner.eq_ignore_ascii_case("x")
        || (!inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()))
}

fn disambiguation(line: &str, reason: &str) -> ParseError {
    ParseError::NameDisambiguation {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(line: &str) -> (String, String) {
        let parsed = disambiguate(line).unwrap();
        (parsed.common, parsed.scientific)
    }

    #[test]
    fn single_group() {
        assert_eq!(
            names("Wood Duck (Aix sponsa)"),
            ("Wood Duck".into(), "Aix sponsa".into())
        );
    }

    #[test]
    fn subspecies_group_wins() {
        assert_eq!(
            names("Mottled Duck (Anas fulvigula) (A. f. maculosa)"),
            ("Mottled Duck".into(), "A. f. maculosa".into())
        );
    }

    #[test]
    fn exotic_naturalized() {
        let parsed =
            disambiguate("Muscovy Duck (Domestic type) (Cairina moschata) (Exotic: Naturalized)")
                .unwrap();
        assert_eq!(parsed.common, "Muscovy Duck (Exotic: Naturalized)");
        assert_eq!(parsed.scientific, "Cairina moschata");
        assert_eq!(
            parsed.shape,
            NameShape::ExoticNaturalized {
                scientific_from_end: 1
            }
        );
    }

    #[test]
    fn count_group_is_ignored() {
        assert_eq!(
            names("Wood Duck (Aix sponsa) (2)"),
            ("Wood Duck".into(), "Aix sponsa".into())
        );
        assert_eq!(
            names("Muscovy Duck (Domestic type) (Cairina moschata) (Exotic: Naturalized) (X)"),
            (
                "Muscovy Duck (Exotic: Naturalized)".into(),
                "Cairina moschata".into()
            )
        );
    }

    #[test]
    fn text_after_the_groups_is_ignored() {
        assert_eq!(
            names("Snow Goose (Anser caerulescens) (1) CONFIRMED"),
            ("Snow Goose".into(), "Anser caerulescens".into())
        );
        assert_eq!(
            names("Wood Duck (Aix sponsa) - flyover"),
            ("Wood Duck".into(), "Aix sponsa".into())
        );
    }

    #[test]
    fn nested_parentheses_in_annotation() {
        assert_eq!(
            names("Red Crossbill (Type 2 (Ponderosa Pine)) (Loxia curvirostra) (1)"),
            ("Red Crossbill".into(), "Loxia curvirostra".into())
        );
    }

    #[test]
    fn no_group_fails() {
        let err = disambiguate("Wood Duck").unwrap_err();
        assert!(matches!(err, ParseError::NameDisambiguation { .. }));
    }

    #[test]
    fn count_only_fails() {
        assert!(disambiguate("Wood Duck (3)").is_err());
    }

    #[test]
    fn qualifier_without_scientific_group_fails() {
        assert!(disambiguate("Muscovy Duck (Exotic: Naturalized)").is_err());
    }

    #[test]
    fn shape_is_computed_once_from_groups() {
        let line = "A (b) (c) (d)";
        let groups = groups_from_end(line);
        assert_eq!(classify_shape(line, &groups).unwrap(), NameShape::MultiGroup);
    }
}
