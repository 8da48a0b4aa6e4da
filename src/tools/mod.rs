//! Tool catalogue and dispatch.
//!
//! The set of tools is closed and fixed at startup: [`ToolRegistry::new`]
//! builds the dispatch table once, mapping each tool name to a descriptor
//! (name, description, parameter schema) and a handler function. The table
//! has no mutating methods, so it can be shared freely between concurrent
//! calls.
//!
//! | Tool                   | Arguments                          |
//! |------------------------|------------------------------------|
//! | `list_smart_plugs`     | none                               |
//! | `get_smart_plug_state` | `deviceId: string`                 |
//! | `control_smart_plug`   | `deviceId: string, state: boolean` |

pub mod dispatcher;
mod handlers;
pub mod schema;

pub use dispatcher::{ToolDispatcher, ToolFailure};
pub use schema::{Arguments, FieldType, ParamSchema};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::backend::DeviceBackend;

/// Result returned by every tool handler.
pub type HandlerResult = Result<Value, ToolFailure>;

/// A tool implementation: one logical backend operation over validated arguments.
pub type HandlerFn = for<'a> fn(&'a dyn DeviceBackend, Arguments) -> BoxFuture<'a, HandlerResult>;

/// A tool as advertised in the capability manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Declared parameters, serialised as JSON Schema.
    #[serde(rename = "inputSchema")]
    pub parameter_schema: ParamSchema,
}

/// A dispatch table row.
pub struct ToolEntry {
    /// What the tool is and what it accepts.
    pub descriptor: ToolDescriptor,
    /// What the tool does.
    pub handler: HandlerFn,
}

/// The dispatch table: tool name to descriptor and handler.
pub struct ToolRegistry {
    entries: IndexMap<&'static str, ToolEntry>,
}

impl ToolRegistry {
    /// Builds the smart-plug tool set.
    #[must_use]
    pub fn new() -> Self {
        let entries = [
            ToolEntry {
                descriptor: ToolDescriptor {
                    name: "list_smart_plugs",
                    description: "List all smart plugs on the account with their current \
                                  on/off and online/offline state.",
                    parameter_schema: ParamSchema::empty(),
                },
                handler: handlers::list_smart_plugs,
            },
            ToolEntry {
                descriptor: ToolDescriptor {
                    name: "control_smart_plug",
                    description: "Turn a smart plug on or off. The reported state is the \
                                  requested state once the vendor accepts the command; the \
                                  relay itself may switch a moment later.",
                    parameter_schema: ParamSchema::empty()
                        .required(
                            "deviceId",
                            FieldType::String,
                            "Device identifier as returned by list_smart_plugs",
                        )
                        .required("state", FieldType::Boolean, "true to turn on, false to turn off"),
                },
                handler: handlers::control_smart_plug,
            },
            ToolEntry {
                descriptor: ToolDescriptor {
                    name: "get_smart_plug_state",
                    description: "Get the current on/off and online/offline state of one \
                                  smart plug.",
                    parameter_schema: ParamSchema::empty().required(
                        "deviceId",
                        FieldType::String,
                        "Device identifier as returned by list_smart_plugs",
                    ),
                },
                handler: handlers::get_smart_plug_state,
            },
        ];

        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.descriptor.name, entry))
                .collect(),
        }
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    /// The capability manifest, in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> + '_ {
        self.entries.values().map(|entry| &entry.descriptor)
    }

    /// Registered tool names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_is_complete() {
        let registry = ToolRegistry::new();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["list_smart_plugs", "control_smart_plug", "get_smart_plug_state"]
        );
        assert!(registry.get("not_a_tool").is_none());
    }

    #[test]
    fn tool_definitions_valid() {
        let registry = ToolRegistry::new();
        for tool in registry.descriptors() {
            let value = serde_json::to_value(tool).unwrap();
            assert!(!tool.name.is_empty());
            assert!(!tool.description.is_empty());
            assert!(value["inputSchema"].is_object());
            assert_eq!(value["inputSchema"]["type"], "object");
        }
    }

    #[test]
    fn control_requires_device_and_state() {
        let registry = ToolRegistry::new();
        let control = registry.get("control_smart_plug").unwrap();
        let required: Vec<_> = control
            .descriptor
            .parameter_schema
            .required_fields()
            .collect();
        assert_eq!(required, vec!["deviceId", "state"]);
    }
}
