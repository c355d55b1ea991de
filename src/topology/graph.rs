use log::debug;
use shared_types::{Output, Properties, Resource, ResourceGraph, Value};

use crate::types::Environment;

/// Accumulates resources in construction order. Every logical ID and export
/// name passing through here is qualified with the environment.
#[derive(Debug)]
pub struct GraphBuilder {
    environment: Environment,
    graph: ResourceGraph,
}

impl GraphBuilder {
    pub fn new(environment: Environment) -> Self {
        GraphBuilder {
            environment,
            graph: ResourceGraph::new(
                environment.as_str(),
                format!("Dify web server topology - env: {}", environment),
            ),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Adds a resource and returns its qualified logical ID.
    pub fn add(&mut self, name: &str, properties: Properties) -> String {
        self.add_after(name, properties, vec![])
    }

    /// Like [`GraphBuilder::add`], with explicit ordering dependencies on
    /// resources the properties do not reference.
    pub fn add_after(
        &mut self,
        name: &str,
        properties: Properties,
        depends_on: Vec<String>,
    ) -> String {
        let logical_id = self.environment.logical_id(name);
        debug!("Adding {} ({})", logical_id, properties.type_name());
        self.graph.resources.push(Resource {
            logical_id: logical_id.clone(),
            properties,
            depends_on,
        });
        logical_id
    }

    /// Republishes `value` under `<export_prefix>-<env>`.
    pub fn export(
        &mut self,
        name: &str,
        value: Value,
        description: &str,
        export_prefix: &str,
    ) -> Output {
        let output = Output {
            logical_id: name.to_string(),
            value,
            description: description.to_string(),
            export_name: self.environment.qualify(export_prefix),
        };
        debug!("Exporting {} as {}", output.logical_id, output.export_name);
        self.graph.outputs.push(output.clone());
        output
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn finish(self) -> ResourceGraph {
        self.graph
    }
}
