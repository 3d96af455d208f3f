use anyhow::anyhow;
use fleetlink_core::ClusterObject;

/// Reshapes a raw observed object into the wire payload of a contribution.
///
/// The transformation engine itself is an external collaborator; the agent
/// only invokes it with the policy's template expression and output field.
pub trait Render: Send + Sync {
    fn render(
        &self,
        obj: &ClusterObject,
        template: &str,
        output_field: &str,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Default renderer: ignores the template expression and serializes the
/// object field addressed by a dotted `output_field` path (the whole object
/// data when the path is empty).
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldRender;

impl Render for FieldRender {
    fn render(
        &self,
        obj: &ClusterObject,
        _template: &str,
        output_field: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let mut value = &obj.data;
        if !output_field.is_empty() {
            for segment in output_field.split('.') {
                value = value
                    .get(segment)
                    .ok_or_else(|| anyhow!("field {output_field:?} not found in {}", obj.key()))?;
            }
        }
        Ok(serde_json::to_vec(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_core::{KindRef, Labels};

    fn obj() -> ClusterObject {
        ClusterObject {
            kind: KindRef::new("v1", "Service"),
            namespace: "prod".to_string(),
            name: "web".to_string(),
            labels: Labels::default(),
            terminating: false,
            data: serde_json::json!({"spec": {"ports": [80]}, "status": {}}),
        }
    }

    #[test]
    fn extracts_nested_field() {
        let payload = FieldRender.render(&obj(), "", "spec.ports").unwrap();
        assert_eq!(payload, b"[80]");
    }

    #[test]
    fn empty_path_renders_whole_object() {
        let payload = FieldRender.render(&obj(), "", "").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value, obj().data);
    }

    #[test]
    fn missing_field_is_an_error() {
        assert!(FieldRender.render(&obj(), "", "spec.missing").is_err());
    }
}
