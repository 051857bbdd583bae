use snafu::ensure;

use crate::{
    analysis::prior::PriorTable,
    consts::{CENTER_VARIANCE, N_COORDS, SIZE_VARIANCE},
    error::{LengthMismatchSnafu, SsdError},
};

/// Scaling applied to the regression outputs before they are added to the
/// priors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Variance {
    pub center: f32,
    pub size: f32,
}

impl Default for Variance {
    fn default() -> Self {
        Self {
            center: CENTER_VARIANCE,
            size: SIZE_VARIANCE,
        }
    }
}

/// Decodes location offsets in place with the default variances.
///
/// See [`decode_locations_with_variance`].
pub fn decode_locations(locations: &mut [f32], priors: &PriorTable) -> Result<(), SsdError> {
    decode_locations_with_variance(locations, priors, Variance::default())
}

/// Decodes the network's location offsets, relative to each prior, into
/// normalized corner-form boxes `[x0, y0, x1, y1]`, overwriting `locations`.
///
/// `locations` must hold exactly four values per prior, in prior order.
pub fn decode_locations_with_variance(
    locations: &mut [f32],
    priors: &PriorTable,
    variance: Variance,
) -> Result<(), SsdError> {
    let priors = priors.as_slice();
    ensure!(
        locations.len() == priors.len() && priors.len() % N_COORDS == 0,
        LengthMismatchSnafu {
            stage: "decode-locations",
            expected: priors.len(),
            actual: locations.len(),
        }
    );

    for (loc, prior) in locations
        .chunks_exact_mut(N_COORDS)
        .zip(priors.chunks_exact(N_COORDS))
    {
        let center_x = loc[0] * variance.center * prior[2] + prior[0];
        let center_y = loc[1] * variance.center * prior[3] + prior[1];
        let width = (loc[2] * variance.size).exp() * prior[2];
        let height = (loc[3] * variance.size).exp() * prior[3];

        loc[0] = center_x - width / 2.0;
        loc[1] = center_y - height / 2.0;
        loc[2] = center_x + width / 2.0;
        loc[3] = center_y + height / 2.0;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_zero_offsets_reproduce_priors() {
        let priors = PriorTable::from(vec![0.5, 0.5, 0.2, 0.4, 0.25, 0.75, 0.1, 0.1]);
        let mut locations = vec![0.0; 8];

        decode_locations(&mut locations, &priors).unwrap();

        let expected = [0.4, 0.3, 0.6, 0.7, 0.2, 0.7, 0.3, 0.8];
        for (got, want) in locations.iter().zip(expected) {
            assert!(close(*got, want), "got {} want {}", got, want);
        }
    }

    #[test]
    fn test_offsets_shift_and_scale() {
        let priors = PriorTable::from(vec![0.5, 0.5, 0.2, 0.2]);
        // One unit of center offset moves by variance * prior size,
        // ln(2) / 0.2 of size offset doubles the width.
        let mut locations = vec![1.0, -1.0, std::f32::consts::LN_2 / 0.2, 0.0];

        decode_locations(&mut locations, &priors).unwrap();

        let center_x = 0.5 + 0.1 * 0.2;
        let center_y = 0.5 - 0.1 * 0.2;
        assert!(close(locations[0], center_x - 0.2));
        assert!(close(locations[1], center_y - 0.1));
        assert!(close(locations[2], center_x + 0.2));
        assert!(close(locations[3], center_y + 0.1));
    }

    #[test]
    fn test_custom_variance() {
        let priors = PriorTable::from(vec![0.5, 0.5, 0.2, 0.2]);
        let mut locations = vec![1.0, 0.0, 0.0, 0.0];

        let variance = Variance {
            center: 0.5,
            size: 0.2,
        };
        decode_locations_with_variance(&mut locations, &priors, variance).unwrap();

        // center_x = 0.5 + 1.0 * 0.5 * 0.2
        assert!(close(locations[0], 0.5));
        assert!(close(locations[2], 0.7));
    }

    #[test]
    fn test_length_mismatch_fails_fast() {
        let priors = PriorTable::from(vec![0.5, 0.5, 0.2, 0.2, 0.5, 0.5, 0.2, 0.2]);
        let mut locations = vec![0.0; 4];
        let original = locations.clone();

        let err = decode_locations(&mut locations, &priors).unwrap_err();
        assert!(matches!(
            err,
            SsdError::LengthMismatch {
                expected: 8,
                actual: 4,
                ..
            }
        ));
        // Nothing was written
        assert_eq!(locations, original);
    }

    #[test]
    fn test_partial_prior_is_rejected() {
        let priors = PriorTable::from(vec![0.5, 0.5, 0.2, 0.2, 0.5, 0.5]);
        let mut locations = vec![0.0; 6];

        assert!(decode_locations(&mut locations, &priors).is_err());
    }

    #[test]
    fn test_decode_reference_table() {
        let priors = PriorTable::mobilenet_ssd();
        let mut locations = vec![0.0; priors.as_slice().len()];

        decode_locations(&mut locations, priors).unwrap();

        for (loc, prior) in locations.chunks_exact(N_COORDS).zip(priors.iter()) {
            assert!(loc[0] <= loc[2] && loc[1] <= loc[3]);
            assert!(close((loc[0] + loc[2]) / 2.0, prior.center.x));
            assert!(close(loc[2] - loc[0], prior.size.x));
        }
    }
}
