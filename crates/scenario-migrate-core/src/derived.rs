//! Derived-value computations used by steps.
//!
//! Everything here is pure: bit-flag tables, the annual EIR integral of a
//! truncated Fourier series, legacy age-bucket matching and timestep/day
//! conversion. Numeric outputs feed directly into documents, so the formulas
//! and tables must stay exactly as they are.

use std::f64::consts::PI;

use crate::error::StepError;

// ===========================================================================
// Bit-flag tables
// ===========================================================================

/// Ordered names for consecutive bits of a legacy integer flag field.
#[derive(Debug, Clone, Copy)]
pub struct FlagTable {
    /// Bit index of `names[0]`.
    pub first_bit: u32,
    pub names: &'static [&'static str],
}

impl FlagTable {
    /// Names of every set bit the table knows, in bit order.
    pub fn decode(&self, bits: u64) -> Vec<&'static str> {
        self.names
            .iter()
            .enumerate()
            .filter(|(i, _)| bits & (1u64 << (self.first_bit + *i as u32)) != 0)
            .map(|(_, name)| *name)
            .collect()
    }

    /// Mask of every bit the table knows.
    pub fn known_mask(&self) -> u64 {
        (0..self.names.len() as u32).fold(0, |mask, i| mask | 1u64 << (self.first_bit + i))
    }

    /// Set bits the table has no name for.
    pub fn unknown_bits(&self, bits: u64) -> u64 {
        bits & !self.known_mask()
    }

    /// Bit index of `name`.
    pub fn bit_of(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|n| *n == name)
            .map(|i| self.first_bit + i as u32)
    }
}

/// Legacy `modelVersion` bits. Bit 0 was never used.
pub const MODEL_OPTION_FLAGS: FlagTable = FlagTable {
    first_bit: 1,
    names: &[
        "PENALISATION_EPISODES",
        "NEGATIVE_BINOMIAL_MASS_ACTION",
        "ATTENUATION_ASEXUAL_DENSITY",
        "LOGNORMAL_MASS_ACTION",
        "NO_PRE_ERYTHROCYTIC",
        "MAX_DENS_CORRECTION",
        "INNATE_MAX_DENS",
        "MAX_DENS_RESET",
        "DUMMY_WITHIN_HOST_MODEL",
        "PREDETERMINED_EPISODES",
        "NON_MALARIA_FEVERS",
        "INCLUDES_PK_PD",
        "CLINICAL_EVENT_SCHEDULER",
        "MUELLER_PRESENTATION_MODEL",
        "TRANS_HET",
        "COMORB_HET",
        "TREAT_HET",
        "COMORB_TRANS_HET",
        "TRANS_TREAT_HET",
        "COMORB_TREAT_HET",
        "TRIPLE_HET",
        "EMPIRICAL_WITHIN_HOST_MODEL",
    ],
};

/// Legacy `summaryOption` bits (survey measures).
pub const SURVEY_OPTION_FLAGS: FlagTable = FlagTable {
    first_bit: 0,
    names: &[
        "nHost",
        "nInfect",
        "nExpectd",
        "nPatent",
        "sumLogPyrogenThres",
        "sumlogDens",
        "totalInfs",
        "nTransmit",
        "totalPatentInf",
        "contrib",
        "sumPyrogenThresh",
        "nTreatments1",
        "nTreatments2",
        "nTreatments3",
        "nUncomp",
        "nSevere",
        "nSeq",
        "nHospitalDeaths",
        "nIndDeaths",
        "nDirDeaths",
        "nEPIVaccinations",
        "imr_summary",
        "nMassVaccinations",
        "nHospitalRecovs",
        "nHospitalSeqs",
        "nIPTDoses",
        "annAvgK",
        "nNMFever",
        "innoculationsPerDayOfYear",
        "kappaPerDayOfYear",
        "innoculationsPerAgeGroup",
    ],
};

// ===========================================================================
// Fourier-series EIR
// ===========================================================================

/// Coefficients of a second-order Fourier series for log daily EIR.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FourierCoefficients {
    pub a0: f64,
    pub a1: f64,
    pub b1: f64,
    pub a2: f64,
    pub b2: f64,
    /// Rotation angle θ in radians.
    pub rotate_angle: f64,
}

pub const DAYS_PER_YEAR: u32 = 365;

/// Annual EIR: sum over the 365 days of a year of the exponentiated series.
///
/// `Σ_{t=0}^{364} exp(a0 + a1·cos(wt−θ) + b1·sin(wt−θ) + a2·cos(2(wt−θ)) + b2·sin(2(wt−θ)))`
/// with `w = 2π/365`.
pub fn annual_eir(c: &FourierCoefficients) -> f64 {
    let w = 2.0 * PI / f64::from(DAYS_PER_YEAR);
    (0..DAYS_PER_YEAR)
        .map(|t| {
            let x = w * f64::from(t) - c.rotate_angle;
            (c.a0 + c.a1 * x.cos() + c.b1 * x.sin() + c.a2 * (2.0 * x).cos()
                + c.b2 * (2.0 * x).sin())
            .exp()
        })
        .sum()
}

// ===========================================================================
// Legacy age buckets
// ===========================================================================

/// A legacy per-age value keyed by its inclusive upper age bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeBucket {
    pub max_age_yrs: f64,
    pub value: f64,
}

/// Upper bounds the legacy sequelae buckets were always written with.
pub const LEGACY_SEQUELAE_MAX_AGES: [f64; 2] = [5.0, 99.0];

/// Lower bounds of the same two groups in the current schema.
pub const SEQUELAE_LOWER_BOUNDS: [f64; 2] = [0.0, 5.0];

/// Values of `buckets` when their upper bounds are exactly `expected`, in order.
///
/// Any other shape cannot be re-expressed with lower bounds without guessing
/// and is a data invariant violation.
pub fn match_legacy_buckets(
    path: &str,
    buckets: &[AgeBucket],
    expected: &[f64],
) -> Result<Vec<f64>, StepError> {
    if buckets.len() != expected.len() {
        return Err(StepError::data(
            path,
            format!(
                "expected {} age groups, found {}",
                expected.len(),
                buckets.len()
            ),
        ));
    }
    buckets
        .iter()
        .zip(expected)
        .map(|(bucket, bound)| {
            if bucket.max_age_yrs == *bound {
                Ok(bucket.value)
            } else {
                Err(StepError::data(
                    path,
                    format!(
                        "age group bound {} does not match expected {}",
                        bucket.max_age_yrs, bound
                    ),
                ))
            }
        })
        .collect()
}

// ===========================================================================
// Timestep conversion
// ===========================================================================

/// Number of timesteps per year for a timestep of `interval_days` days.
///
/// The interval must be a positive whole number of days.
pub fn steps_per_year(path: &str, interval_days: &str) -> Result<f64, StepError> {
    let days: u32 = interval_days.trim().parse().map_err(|_| {
        StepError::data(
            path,
            format!("timestep length {interval_days:?} is not a whole number of days"),
        )
    })?;
    if days == 0 {
        return Err(StepError::data(path, "timestep length is zero"));
    }
    Ok(f64::from(DAYS_PER_YEAR) / f64::from(days))
}

/// Convert a duration in timesteps into years.
pub fn timesteps_to_years(steps: f64, steps_per_year: f64) -> f64 {
    steps / steps_per_year
}

/// Rescale a 5-day timestep index to the equivalent 1-day timestep index.
///
/// `None` when the rescaled index does not fit in an `i64`.
pub fn five_day_to_one_day_step(step: i64) -> Option<i64> {
    step.checked_sub(1)?.checked_mul(5)?.checked_add(1)
}

// ===========================================================================
// Tests
// ===========================================================================
