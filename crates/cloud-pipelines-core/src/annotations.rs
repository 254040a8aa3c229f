// cloud-pipelines-core/src/annotations.rs
// ============================================================================
// Module: Annotation Merging
// Description: Recursive right-biased dict merge for launcher annotations.
// Purpose: Implement the `default ⊕ run ⊕ task` merge policy 
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Launchers receive one merged annotation object built from three layers in
//! increasing priority: default task annotations, the owning `PipelineRun`'s
//! annotations, and the `TaskSpec`'s own annotations. The merge is recursive
//! over JSON objects; at any leaf (including lists) the right-hand operand
//! wins outright rather than being combined.

use serde_json::Map;
use serde_json::Value;

/// Merges `overlay` onto `base`, right-biased: object values merge
/// recursively key-by-key; any other value (including arrays) in `overlay`
/// replaces the corresponding value in `base` wholesale.
#[must_use]
pub fn merge_annotations(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            Value::Object(merge_objects(base_map, overlay_map))
        }
        _ => overlay.clone(),
    }
}

fn merge_objects(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, overlay_value) in overlay {
        match merged.get(key) {
            Some(base_value) => {
                let merged_value = merge_annotations(base_value, overlay_value);
                merged.insert(key.clone(), merged_value);
            }
            None => {
                merged.insert(key.clone(), overlay_value.clone());
            }
        }
    }
    merged
}

/// Merges three annotation layers in order of increasing priority:
/// `default_task_annotations ⊕ pipeline_run.annotations ⊕ task_spec.annotations`.
#[must_use]
pub fn merge_annotation_layers(layers: &[&Value]) -> Value {
    layers.iter().fold(Value::Object(Map::new()), |acc, layer| merge_annotations(&acc, layer))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use serde_json::json;

    use super::merge_annotation_layers;
    use super::merge_annotations;

    #[test]
    fn right_wins_at_leaves() {
        let base = json!({"a": 1, "b": {"c": 2}});
        let overlay = json!({"b": {"c": 3, "d": 4}});
        assert_eq!(merge_annotations(&base, &overlay), json!({"a": 1, "b": {"c": 3, "d": 4}}));
    }

    #[test]
    fn lists_are_replaced_not_concatenated() {
        let base = json!({"tags": ["x", "y"]});
        let overlay = json!({"tags": ["z"]});
        assert_eq!(merge_annotations(&base, &overlay), json!({"tags": ["z"]}));
    }

    #[test]
    fn three_layer_merge_respects_priority() {
        let default_layer = json!({"team": "default", "env": "prod"});
        let run_layer = json!({"team": "run-team"});
        let task_layer = json!({"team": "task-team", "extra": true});
        let merged =
            merge_annotation_layers(&[&default_layer, &run_layer, &task_layer]);
        assert_eq!(merged, json!({"team": "task-team", "env": "prod", "extra": true}));
    }
}
