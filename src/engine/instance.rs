//! Graph flattening: expands the main processor or graph into processor
//! instances and point-to-point routes between their endpoints.
//!
//! Graph boundaries are resolved away, so every route runs from a real
//! source (a top-level input or an instance output) to a real sink (an
//! instance input or a top-level output).

use std::collections::HashMap;

use crate::sema::tir::{Module, PortRef, ProcessorId, ProcessorRef};

/// One processor instantiated somewhere in the graph hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub processor: ProcessorId,
    /// Node name, or the processor name for a top-level processor.
    pub name: String,
    /// Dotted path from the top-level graph, e.g. `Synth.osc`.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    TopInput(usize),
    TopOutput(usize),
    Input { instance: usize, endpoint: usize },
    Output { instance: usize, endpoint: usize },
    /// A graph endpoint somewhere inside the hierarchy.
    Boundary(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub source: Port,
    pub dest: Port,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flattened {
    pub instances: Vec<Instance>,
    pub routes: Vec<Route>,
}

impl Flattened {
    /// Instance-to-instance dependencies, deduplicated.
    pub fn dependencies(&self) -> Vec<(usize, usize)> {
        let mut deps: Vec<(usize, usize)> = self
            .routes
            .iter()
            .filter_map(|r| match (r.source, r.dest) {
                (Port::Output { instance: a, .. }, Port::Input { instance: b, .. }) => Some((a, b)),
                _ => None,
            })
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }
}

pub fn flatten(module: &Module, main: ProcessorRef) -> Flattened {
    let mut flattener = Flattener {
        module,
        instances: Vec::new(),
        edges: Vec::new(),
        boundaries: 0,
    };
    let name = short_name(module.name_of(main)).to_string();
    let (inputs, outputs) = flattener.expand(main, name.clone(), name);
    for (i, port) in inputs.into_iter().enumerate() {
        flattener.edges.push((Port::TopInput(i), port));
    }
    for (i, port) in outputs.into_iter().enumerate() {
        flattener.edges.push((port, Port::TopOutput(i)));
    }
    flattener.resolve()
}

fn short_name(qualified: &str) -> &str {
    qualified.rsplit("::").next().unwrap_or(qualified)
}

struct Flattener<'m> {
    module: &'m Module,
    instances: Vec<Instance>,
    edges: Vec<(Port, Port)>,
    boundaries: usize,
}

impl<'m> Flattener<'m> {
    /// Instantiate `target`, returning the port standing for each of its
    /// inputs and outputs.
    fn expand(&mut self, target: ProcessorRef, name: String, path: String) -> (Vec<Port>, Vec<Port>) {
        match target {
            ProcessorRef::Processor(processor) => {
                let instance = self.instances.len();
                let p = &self.module.processors[processor];
                let inputs = (0..p.inputs.len())
                    .map(|endpoint| Port::Input { instance, endpoint })
                    .collect();
                let outputs = (0..p.outputs.len())
                    .map(|endpoint| Port::Output { instance, endpoint })
                    .collect();
                self.instances.push(Instance {
                    processor,
                    name,
                    path,
                });
                (inputs, outputs)
            }
            ProcessorRef::Graph(id) => {
                let module = self.module;
                let graph = &module.graphs[id];
                let inputs: Vec<Port> = graph.inputs.iter().map(|_| self.boundary()).collect();
                let outputs: Vec<Port> = graph.outputs.iter().map(|_| self.boundary()).collect();

                let children: Vec<(Vec<Port>, Vec<Port>)> = graph
                    .nodes
                    .iter()
                    .map(|node| {
                        let child_path = format!("{path}.{}", node.name);
                        self.expand(node.target, node.name.clone(), child_path)
                    })
                    .collect();

                for conn in &graph.connections {
                    let source = match conn.source {
                        PortRef::Graph(i) => inputs[i],
                        PortRef::Node { node, endpoint } => children[node].1[endpoint],
                    };
                    let dest = match conn.dest {
                        PortRef::Graph(o) => outputs[o],
                        PortRef::Node { node, endpoint } => children[node].0[endpoint],
                    };
                    self.edges.push((source, dest));
                }
                (inputs, outputs)
            }
        }
    }

    fn boundary(&mut self) -> Port {
        self.boundaries += 1;
        Port::Boundary(self.boundaries - 1)
    }

    fn resolve(self) -> Flattened {
        let mut next: HashMap<Port, Vec<Port>> = HashMap::new();
        for &(from, to) in &self.edges {
            next.entry(from).or_default().push(to);
        }

        let mut routes = Vec::new();
        for &(from, _) in &self.edges {
            if matches!(from, Port::Boundary(_)) || routes.iter().any(|r: &Route| r.source == from) {
                continue;
            }
            let mut sinks = Vec::new();
            collect_sinks(&next, from, &mut sinks, 0);
            for dest in sinks {
                routes.push(Route { source: from, dest });
            }
        }

        Flattened {
            instances: self.instances,
            routes,
        }
    }
}

fn collect_sinks(next: &HashMap<Port, Vec<Port>>, from: Port, sinks: &mut Vec<Port>, depth: usize) {
    // boundaries only chain through nesting levels, which are finite
    if depth > next.len() {
        return;
    }
    for &to in next.get(&from).into_iter().flatten() {
        match to {
            Port::Boundary(_) => collect_sinks(next, to, sinks, depth + 1),
            sink => sinks.push(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema;
    use crate::syntax::parse_unit;

    fn flatten_source(src: &str) -> (Module, Flattened) {
        let module = sema::analyse(&[parse_unit(src, None).unwrap()]).unwrap();
        let main = module.main.unwrap();
        let flat = flatten(&module, main);
        (module, flat)
    }

    const GAIN: &str = "
        processor Gain { input stream float in; output stream float out;
            void main() { loop { out <- in * 0.5f; advance(); } } }
    ";

    #[test]
    fn single_processor_routes_straight_through() {
        let (_, flat) = flatten_source(GAIN);
        assert_eq!(flat.instances.len(), 1);
        assert_eq!(
            flat.routes,
            vec![
                Route {
                    source: Port::TopInput(0),
                    dest: Port::Input { instance: 0, endpoint: 0 }
                },
                Route {
                    source: Port::Output { instance: 0, endpoint: 0 },
                    dest: Port::TopOutput(0)
                },
            ]
        );
    }

    #[test]
    fn nested_graph_boundaries_are_removed() {
        let src = format!(
            "{GAIN}
            graph Inner {{ input stream float in; output stream float out;
                node g = Gain; connection in -> g -> out; }}
            graph Outer {{ input stream float in; output stream float out;
                node a = Inner; node b = Inner;
                connection in -> a.in; connection a.out -> b.in; connection b.out -> out; }}"
        );
        let (_, flat) = flatten_source(&src);
        assert_eq!(flat.instances.len(), 2);
        assert_eq!(flat.instances[0].path, "Outer.a.g");
        assert_eq!(flat.instances[1].path, "Outer.b.g");
        assert_eq!(flat.dependencies(), vec![(0, 1)]);
        assert!(flat.routes.contains(&Route {
            source: Port::TopInput(0),
            dest: Port::Input { instance: 0, endpoint: 0 }
        }));
        assert!(flat.routes.contains(&Route {
            source: Port::Output { instance: 1, endpoint: 0 },
            dest: Port::TopOutput(0)
        }));
    }

    #[test]
    fn graph_pass_through_connects_input_to_output() {
        let src = format!(
            "{GAIN}
            graph Thru {{ input stream float in; output stream float out, dry;
                node g = Gain; connection in -> g -> out; connection in -> dry; }}"
        );
        let (_, flat) = flatten_source(&src);
        assert!(flat.routes.contains(&Route {
            source: Port::TopInput(0),
            dest: Port::TopOutput(1)
        }));
    }
}
