//! Evaluation of step execution and skip conditions.

use crate::models::StepCondition;
use crate::state_machine::StepState;
use serde_json::Value;
use std::collections::HashMap;

/// Evaluate a condition against the job context and the current sibling statuses.
///
/// Context keys use dotted paths (`source.mode`) resolved through nested objects.
pub fn evaluate(
    condition: &StepCondition,
    context: &Value,
    statuses: &HashMap<String, StepState>,
) -> bool {
    match condition {
        StepCondition::Always => true,
        StepCondition::Never => false,
        StepCondition::ContextEquals { key, value } => {
            lookup(context, key).map(|v| v == value).unwrap_or(false)
        }
        StepCondition::ContextExists { key } => {
            lookup(context, key).map(|v| !v.is_null()).unwrap_or(false)
        }
        StepCondition::StepStatus { step, status } => statuses.get(step) == Some(status),
        StepCondition::Not { condition } => !evaluate(condition, context, statuses),
        StepCondition::All { conditions } => {
            conditions.iter().all(|c| evaluate(c, context, statuses))
        }
        StepCondition::Any { conditions } => {
            conditions.iter().any(|c| evaluate(c, context, statuses))
        }
    }
}

fn lookup<'a>(context: &'a Value, key: &str) -> Option<&'a Value> {
    let pointer = format!("/{}", key.replace('.', "/"));
    context.pointer(&pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_context_lookup() {
        let ctx = json!({ "source": { "mode": "full" } });
        let cond = StepCondition::ContextEquals {
            key: "source.mode".into(),
            value: json!("full"),
        };
        assert!(evaluate(&cond, &ctx, &HashMap::new()));
        assert!(!evaluate(
            &StepCondition::ContextExists { key: "source.other".into() },
            &ctx,
            &HashMap::new()
        ));
    }

    #[test]
    fn combinators_and_statuses() {
        let statuses = HashMap::from([("scan".to_string(), StepState::Failed)]);
        let cond = StepCondition::All {
            conditions: vec![
                StepCondition::StepStatus {
                    step: "scan".into(),
                    status: StepState::Failed,
                },
                StepCondition::Not {
                    condition: Box::new(StepCondition::Never),
                },
            ],
        };
        assert!(evaluate(&cond, &Value::Null, &statuses));
        assert!(!evaluate(
            &StepCondition::Any { conditions: vec![] },
            &Value::Null,
            &statuses
        ));
    }
}
