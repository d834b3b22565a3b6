use super::types::StressScenario;

struct ScenarioDef {
    key: &'static str,
    name: &'static str,
    returns: &'static [f64],
    inflation_override: Option<f64>,
}

// Calendar-year total returns of a broad equity index, percent.
const BUILTIN: &[ScenarioDef] = &[
    ScenarioDef {
        key: "gfc-2008",
        name: "2008 global financial crisis",
        returns: &[-37.0, 26.5, 15.1, 2.1, 16.0],
        inflation_override: None,
    },
    ScenarioDef {
        key: "dotcom-2000",
        name: "2000 dot-com crash",
        returns: &[-9.1, -11.9, -22.1, 28.7, 10.9],
        inflation_override: None,
    },
    ScenarioDef {
        key: "stagflation-1973",
        name: "1973 stagflation",
        returns: &[-14.7, -26.5, 37.2, 23.8, -7.2],
        inflation_override: Some(0.09),
    },
    ScenarioDef {
        key: "rate-shock-2022",
        name: "2022 rate shock",
        returns: &[-18.1, 26.3],
        inflation_override: Some(0.065),
    },
];

pub fn builtin() -> Vec<StressScenario> {
    BUILTIN.iter().map(to_scenario).collect()
}

pub fn find(key: &str) -> Option<StressScenario> {
    BUILTIN.iter().find(|def| def.key == key).map(to_scenario)
}

pub fn keys() -> impl Iterator<Item = &'static str> {
    BUILTIN.iter().map(|def| def.key)
}

fn to_scenario(def: &ScenarioDef) -> StressScenario {
    StressScenario {
        key: def.key.to_string(),
        name: def.name.to_string(),
        returns: def.returns.to_vec(),
        inflation_override: def.inflation_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_named_scenario() {
        let gfc = find("gfc-2008").expect("builtin scenario");
        assert_eq!(gfc.returns[0], -37.0);
        assert_eq!(gfc.inflation_override, None);
        assert!(find("no-such-crash").is_none());
    }

    #[test]
    fn builtin_keys_are_unique_and_returns_finite() {
        let all = builtin();
        let keys: Vec<_> = keys().collect();
        assert_eq!(all.len(), keys.len());
        for (idx, key) in keys.iter().enumerate() {
            assert!(!keys[idx + 1..].contains(key), "duplicate key {key}");
        }
        assert!(all.iter().all(|s| !s.returns.is_empty()));
        assert!(all.iter().flat_map(|s| &s.returns).all(|r| r.is_finite()));
    }
}
