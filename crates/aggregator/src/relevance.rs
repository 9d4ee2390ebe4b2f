use listing::VehicleAttributes;

const MAKE_WEIGHT: f32 = 0.35;
const MODEL_WEIGHT: f32 = 0.35;
const YEAR_WEIGHT: f32 = 0.2;
const BODY_WEIGHT: f32 = 0.1;

const AGREEMENT_WEIGHT: f32 = 0.8;
const POSITION_WEIGHT: f32 = 0.2;

fn same_text(a: &Option<String>, b: &Option<String>) -> Option<bool> {
    let reference = a.as_deref()?;
    Some(b.as_deref().is_some_and(|b| b.eq_ignore_ascii_case(reference)))
}

/// Weighted share of the reference attributes the candidate agrees with.
///
/// Only attributes present on the reference count; with none present the
/// agreement is 1.0.
pub fn attribute_agreement(reference: &VehicleAttributes, candidate: &VehicleAttributes) -> f32 {
    let reference = reference.clone().normalized();
    let candidate = candidate.clone().normalized();
    let checks = [
        (MAKE_WEIGHT, same_text(&reference.make, &candidate.make)),
        (MODEL_WEIGHT, same_text(&reference.model, &candidate.model)),
        (
            YEAR_WEIGHT,
            reference.year.map(|year| candidate.year == Some(year)),
        ),
        (
            BODY_WEIGHT,
            same_text(&reference.body_type, &candidate.body_type),
        ),
    ];

    let (matched, total) = checks
        .iter()
        .filter_map(|(weight, outcome)| outcome.map(|hit| (*weight, hit)))
        .fold((0.0f32, 0.0f32), |(matched, total), (weight, hit)| {
            (matched + if hit { weight } else { 0.0 }, total + weight)
        });
    if total == 0.0 {
        1.0
    } else {
        matched / total
    }
}

/// `0.8 * agreement + 0.2 / (1 + position)`, in `[0, 1]`.
pub fn relevance(
    reference: &VehicleAttributes,
    candidate: &VehicleAttributes,
    position: usize,
) -> f32 {
    let agreement = attribute_agreement(reference, candidate);
    let rank = POSITION_WEIGHT / (1.0 + position as f32);
    (AGREEMENT_WEIGHT * agreement + rank).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn civic() -> VehicleAttributes {
        VehicleAttributes::new()
            .with_make("Honda")
            .with_model("Civic")
            .with_year(2019)
            .with_body_type("Sedan")
    }

    #[test]
    fn full_agreement_at_top_position_is_one() {
        let candidate = VehicleAttributes::new()
            .with_make("HONDA")
            .with_model("civic")
            .with_year(2019)
            .with_body_type("sedan");
        assert!((relevance(&civic(), &candidate, 0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn partial_agreement_weighs_attributes() {
        let candidate = VehicleAttributes::new()
            .with_make("Honda")
            .with_model("Accord")
            .with_year(2019);
        // make 0.35 + year 0.2 out of 1.0
        assert!((attribute_agreement(&civic(), &candidate) - 0.55).abs() < 1e-6);
    }

    #[test]
    fn only_present_reference_attributes_count() {
        let reference = VehicleAttributes::new().with_make("Honda");
        let candidate = VehicleAttributes::new().with_make("honda").with_year(2001);
        assert_eq!(attribute_agreement(&reference, &candidate), 1.0);
        assert_eq!(
            attribute_agreement(&VehicleAttributes::new(), &VehicleAttributes::new()),
            1.0
        );
    }

    #[test]
    fn unknown_sentinel_is_ignored() {
        let reference = VehicleAttributes::new()
            .with_make("Honda")
            .with_model("Unknown");
        let candidate = VehicleAttributes::new().with_make("Honda").with_model("Fit");
        assert_eq!(attribute_agreement(&reference, &candidate), 1.0);
    }

    #[test]
    fn later_positions_score_lower() {
        let a = relevance(&civic(), &civic(), 0);
        let b = relevance(&civic(), &civic(), 1);
        let c = relevance(&civic(), &civic(), 9);
        assert!(a > b && b > c);
        assert!((c - (0.8 + 0.02)).abs() < 1e-6);
    }
}
