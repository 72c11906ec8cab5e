use once_cell::sync::Lazy;
use regex::Regex;

static SPECIES_STOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^stock_(\d+)_(\d+)$").unwrap());
static METHOD_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^harvest_value_([a-z]+)_(\d+)$").unwrap());

/// What a wide-table column means to the pipeline, decoded from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    Identifier,
    Area,
    /// Harvest value of one cutting method; these columns make up the activity span.
    MethodValue { method: String, year: u32 },
    /// Stock volume of one species at one checkpoint; read by the carbon stage.
    SpeciesStock { species: u32, year: u32 },
    /// Carried through to the alternatives table without interpretation.
    Other,
}

impl Metric {
    pub fn parse(name: &str) -> Metric {
        match name {
            "identifier" => return Metric::Identifier,
            "area" => return Metric::Area,
            _ => {}
        }
        let num = |caps: &regex::Captures, i: usize| caps[i].parse::<u32>().ok();

        if let Some(c) = SPECIES_STOCK.captures(name) {
            if let (Some(species), Some(year)) = (num(&c, 1), num(&c, 2)) {
                return Metric::SpeciesStock { species, year };
            }
        }
        if let Some(c) = METHOD_VALUE.captures(name) {
            if let Some(year) = num(&c, 2) {
                return Metric::MethodValue {
                    method: c[1].to_string(),
                    year,
                };
            }
        }
        Metric::Other
    }

    /// `clearcut_5` for `harvest_value_clearcut_5`; `None` outside the activity family.
    pub fn treatment_label(&self) -> Option<String> {
        match self {
            Metric::MethodValue { method, year } => Some(format!("{}_{}", method, year)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interpreted_families() {
        assert_eq!(Metric::parse("identifier"), Metric::Identifier);
        assert_eq!(Metric::parse("area"), Metric::Area);
        assert_eq!(
            Metric::parse("stock_12_10"),
            Metric::SpeciesStock {
                species: 12,
                year: 10
            }
        );
        assert_eq!(
            Metric::parse("harvest_value_clearcut_5"),
            Metric::MethodValue {
                method: "clearcut".into(),
                year: 5
            }
        );
    }

    #[test]
    fn totals_are_not_interpreted() {
        for name in ["stock_25", "harvest_value_5", "harvest_20", "npv_3_percent"] {
            assert_eq!(Metric::parse(name), Metric::Other, "{name}");
        }
    }

    #[test]
    fn treatment_label_uses_method_and_year() {
        assert_eq!(
            Metric::parse("harvest_value_below_20").treatment_label(),
            Some("below_20".to_string())
        );
        assert_eq!(Metric::parse("stock_1_0").treatment_label(), None);
    }
}
