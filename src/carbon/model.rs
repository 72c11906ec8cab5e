//! Stem-volume to CO2 conversion.
//!
//! Biomass expansion factors from Lehtonen et al. (2004), doi:10.1016/j.foreco.2003.07.008,
//! with the age-dependent form used in doi:10.1007/s13280-023-01833-4. Volumes are m³,
//! results are Mg CO2.

/// Expansion factor `a + b * e^(-0.01 * age)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allometry {
    pub a: f64,
    pub b: f64,
}

impl Allometry {
    pub fn factor(&self, age: f64) -> f64 {
        self.a + self.b * (-0.01 * age).exp()
    }
}

pub const PINE: Allometry = Allometry {
    a: 0.7018,
    b: 0.0058,
};

pub const SPRUCE: Allometry = Allometry {
    a: 0.7406,
    b: 0.1494,
};

/// Shared by every species other than pine (1) and spruce (2).
pub const DECIDUOUS: Allometry = Allometry {
    a: 0.5616,
    b: -0.0179,
};

/// Carbon share of dry biomass.
pub const CARBON_FRACTION: f64 = 0.5;

/// Molar mass ratio CO2 / C.
pub const CO2_PER_CARBON: f64 = 44.0 / 12.0;

/// CO2 stored by one stand at one checkpoint.
///
/// `volumes[k - 1]` is the stock volume of species `k`; `age_of(k)` its cohort age.
/// Pine and spruce are combined before scaling, the remaining species are scaled one by
/// one and accumulated in species order.
pub fn stand_co2(volumes: &[f64], age_of: impl Fn(u32) -> f64) -> f64 {
    let volume = |k: usize| volumes.get(k).copied().unwrap_or(0.0);

    let conifers = (volume(0) * PINE.factor(age_of(1)) + volume(1) * SPRUCE.factor(age_of(2)))
        * CARBON_FRACTION
        * CO2_PER_CARBON;

    let mut others = 0.0;
    for (i, v) in volumes.iter().enumerate().skip(2) {
        let species = i as u32 + 1;
        others += (v * DECIDUOUS.factor(age_of(species))) * CARBON_FRACTION * CO2_PER_CARBON;
    }

    conifers + others
}
