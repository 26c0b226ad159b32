//! Filter engine for subsetting personas by attribute-filter expressions.
//!
//! Supports SQL-ish expressions over open persona attribute maps:
//! - `age>=30`                      numeric comparison
//! - `gender=F`                     string equality
//! - `income!=low`                  string inequality
//! - `region in [North,South,West]` membership
//! - `region not in [East]`         negated membership
//!
//! All filters on a request AND together. A field absent from a persona
//! makes that filter evaluate false for the persona, never an error.

use regex::Regex;

use panelsim_common::{PanelsimError, Persona};

/// Comparison operators, tested longest-first so `=` never shadows the
/// two-character forms.
const OPERATORS: &[&str] = &[">=", "<=", "!=", ">", "<", "="];

pub struct FilterEngine {
    in_re: Regex,
    not_in_re: Regex,
    validate_re: Regex,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            in_re: Regex::new(r"^(\w+)\s+in\s+\[([^\]]+)\]").expect("valid regex"),
            not_in_re: Regex::new(r"^(\w+)\s+not\s+in\s+\[([^\]]+)\]").expect("valid regex"),
            validate_re: Regex::new(r"^(\w+)\s+(not\s+)?in\s+\[([^\]]+)\]").expect("valid regex"),
        }
    }

    /// Evaluate all filters against all personas. Returns the matched subset
    /// plus a per-persona match flag aligned with the input order.
    pub fn apply_filters(
        &self,
        personas: &[Persona],
        filters: &[String],
    ) -> Result<(Vec<Persona>, Vec<bool>), PanelsimError> {
        if filters.is_empty() {
            return Ok((personas.to_vec(), vec![true; personas.len()]));
        }

        let mut match_flags = Vec::with_capacity(personas.len());
        let mut matched = Vec::new();

        for persona in personas {
            let mut matches = true;
            for filter in filters {
                if !self.evaluate(persona, filter)? {
                    matches = false;
                    break;
                }
            }
            match_flags.push(matches);
            if matches {
                matched.push(persona.clone());
            }
        }

        Ok((matched, match_flags))
    }

    /// Evaluate a single filter expression against a persona.
    fn evaluate(&self, persona: &Persona, filter: &str) -> Result<bool, PanelsimError> {
        if let Some(caps) = self.in_re.captures(filter) {
            let field = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let values: Vec<&str> = caps[2].split(',').map(str::trim).collect();
            return Ok(match persona.get(field) {
                Some(value) => values.contains(&value.to_string().as_str()),
                None => false,
            });
        }

        if let Some(caps) = self.not_in_re.captures(filter) {
            let field = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let values: Vec<&str> = caps[2].split(',').map(str::trim).collect();
            return Ok(match persona.get(field) {
                Some(value) => !values.contains(&value.to_string().as_str()),
                None => false,
            });
        }

        for op in OPERATORS {
            if let Some(idx) = filter.find(op) {
                let field = filter[..idx].trim();
                let value = filter[idx + op.len()..].trim();

                let persona_value = match persona.get(field) {
                    Some(v) => v,
                    None => return Ok(false),
                };

                // Numeric comparison first; fall back to string comparison
                // when either side fails to parse.
                if let (Some(a), Ok(b)) = (persona_value.as_f64(), value.parse::<f64>()) {
                    return Ok(compare(op, &a, &b));
                }
                return Ok(compare(op, persona_value.to_string().as_str(), value));
            }
        }

        Err(PanelsimError::validation(format!(
            "Invalid filter expression: {filter}"
        )))
    }

    /// Validate filter expressions without touching personas. Returns one
    /// human-readable error per bad expression; empty means all valid.
    pub fn validate_filters(&self, filters: &[String]) -> Vec<String> {
        let mut errors = Vec::new();

        for (i, filter) in filters.iter().enumerate() {
            if filter.contains(" in [") || filter.contains(" not in [") {
                if !self.validate_re.is_match(filter) {
                    errors.push(format!("Filter {i}: Invalid 'in' expression: {filter}"));
                }
                continue;
            }

            let mut has_operator = false;
            for op in OPERATORS {
                if let Some(idx) = filter.find(op) {
                    has_operator = true;
                    let field = filter[..idx].trim();
                    let value = filter[idx + op.len()..].trim();
                    if field.is_empty() || value.is_empty() {
                        errors.push(format!("Filter {i}: Invalid comparison: {filter}"));
                    }
                    break;
                }
            }

            if !has_operator {
                errors.push(format!("Filter {i}: No valid operator found: {filter}"));
            }
        }

        errors
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn compare<T: PartialOrd + PartialEq + ?Sized>(op: &str, a: &T, b: &T) -> bool {
    match op {
        ">=" => a >= b,
        "<=" => a <= b,
        "!=" => a != b,
        ">" => a > b,
        "<" => a < b,
        "=" => a == b,
        _ => unreachable!("operator table is fixed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelsim_common::AttrValue;
    use std::collections::BTreeMap;

    fn persona(pairs: &[(&str, AttrValue)]) -> Persona {
        let mut attributes = BTreeMap::new();
        for (key, value) in pairs {
            attributes.insert(key.to_string(), value.clone());
        }
        Persona { attributes }
    }

    fn sample_personas() -> Vec<Persona> {
        vec![
            persona(&[
                ("persona_id", AttrValue::String("p1".into())),
                ("gender", AttrValue::String("F".into())),
                ("age", AttrValue::Number(34.0)),
                ("region", AttrValue::String("North".into())),
            ]),
            persona(&[
                ("persona_id", AttrValue::String("p2".into())),
                ("gender", AttrValue::String("M".into())),
                ("age", AttrValue::Number(52.0)),
                ("region", AttrValue::String("South".into())),
            ]),
            persona(&[
                ("persona_id", AttrValue::String("p3".into())),
                ("gender", AttrValue::String("F".into())),
                ("age", AttrValue::Number(28.0)),
                ("region", AttrValue::String("East".into())),
            ]),
        ]
    }

    fn filters(exprs: &[&str]) -> Vec<String> {
        exprs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_filters_matches_everyone() {
        let engine = FilterEngine::new();
        let personas = sample_personas();
        let (matched, flags) = engine.apply_filters(&personas, &[]).unwrap();
        assert_eq!(matched.len(), 3);
        assert_eq!(flags, vec![true, true, true]);
    }

    #[test]
    fn string_equality() {
        let engine = FilterEngine::new();
        let (matched, flags) = engine
            .apply_filters(&sample_personas(), &filters(&["gender=F"]))
            .unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn numeric_equality() {
        let engine = FilterEngine::new();
        let (matched, _) = engine
            .apply_filters(&sample_personas(), &filters(&["age=34"]))
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id().as_deref(), Some("p1"));
    }

    #[test]
    fn greater_than() {
        let engine = FilterEngine::new();
        let (matched, flags) = engine
            .apply_filters(&sample_personas(), &filters(&["age>30"]))
            .unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn greater_than_or_equal() {
        let engine = FilterEngine::new();
        let (matched, _) = engine
            .apply_filters(&sample_personas(), &filters(&["age>=34"]))
            .unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn less_than() {
        let engine = FilterEngine::new();
        let (matched, _) = engine
            .apply_filters(&sample_personas(), &filters(&["age<30"]))
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id().as_deref(), Some("p3"));
    }

    #[test]
    fn less_than_or_equal() {
        let engine = FilterEngine::new();
        let (matched, _) = engine
            .apply_filters(&sample_personas(), &filters(&["age<=34"]))
            .unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn not_equal() {
        let engine = FilterEngine::new();
        let (matched, flags) = engine
            .apply_filters(&sample_personas(), &filters(&["gender!=F"]))
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn membership() {
        let engine = FilterEngine::new();
        let (matched, flags) = engine
            .apply_filters(&sample_personas(), &filters(&["region in [North,South]"]))
            .unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn negated_membership() {
        let engine = FilterEngine::new();
        let (matched, _) = engine
            .apply_filters(&sample_personas(), &filters(&["region not in [East]"]))
            .unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn multiple_filters_and_together() {
        let engine = FilterEngine::new();
        let (matched, flags) = engine
            .apply_filters(&sample_personas(), &filters(&["gender=F", "age>30"]))
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn missing_field_evaluates_false() {
        let engine = FilterEngine::new();
        let personas = vec![persona(&[("persona_id", AttrValue::String("p1".into()))])];
        let (matched, flags) = engine
            .apply_filters(&personas, &filters(&["income>50000"]))
            .unwrap();
        assert!(matched.is_empty());
        assert_eq!(flags, vec![false]);
    }

    #[test]
    fn numeric_string_attribute_compares_numerically() {
        let engine = FilterEngine::new();
        let personas = vec![persona(&[
            ("persona_id", AttrValue::String("p1".into())),
            ("age", AttrValue::String("40".into())),
        ])];
        let (matched, _) = engine
            .apply_filters(&personas, &filters(&["age>=35"]))
            .unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn invalid_expression_is_error() {
        let engine = FilterEngine::new();
        let result = engine.apply_filters(&sample_personas(), &filters(&["no operator here"]));
        assert!(matches!(result, Err(PanelsimError::Validation(_))));
    }

    #[test]
    fn validate_accepts_good_filters() {
        let engine = FilterEngine::new();
        let errors = engine.validate_filters(&filters(&[
            "age>=30",
            "gender=F",
            "region in [North,South]",
            "region not in [East]",
        ]));
        assert!(errors.is_empty());
    }

    #[test]
    fn validate_rejects_bad_filters() {
        let engine = FilterEngine::new();

        let errors = engine.validate_filters(&filters(&["gibberish"]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("No valid operator found"));

        let errors = engine.validate_filters(&filters(&["age>="]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Invalid comparison"));

        let errors = engine.validate_filters(&filters(&["region in []"]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Invalid 'in' expression"));
    }

    #[test]
    fn validate_reports_index_of_offender() {
        let engine = FilterEngine::new();
        let errors = engine.validate_filters(&filters(&["age>=30", "bad"]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Filter 1:"));
    }
}
