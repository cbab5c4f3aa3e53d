use std::fmt;

use indexmap::IndexMap;
use multimap::MultiMap;
use petgraph::{
    graph::{NodeIndex, UnGraph},
    visit::{EdgeRef, IntoNodeReferences, NodeIndexable},
};
use tracing::{debug, warn};
use uom::si::{
    area::square_meter,
    f64::{Area, HeatCapacity, HeatTransfer, ThermalConductance, Velocity},
    heat_capacity::joule_per_kelvin,
    heat_transfer::watt_per_square_meter_kelvin,
    thermal_conductance::watt_per_kelvin,
    velocity::meter_per_second,
};

use crate::construction::{resolve_construction, ResolvedConstruction};
use crate::error::{ModelError, ModelResult};
use crate::model::{BoundaryType, Model};
use crate::tools::{air_convection_heat_transfer, reciprocal_sum};

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    /// Set for zone and pseudo-zone nodes.
    pub zone_name: Option<String>,
    /// (zone, marker) pairs of heat inputs injected into this node.
    pub markers: Vec<(String, String)>,
    /// Infinite for pseudo-zones, zero for nodes of zero-area boundaries.
    pub heat_capacity: HeatCapacity,
    /// Area of the boundary element the node belongs to.
    pub area: Area,
    /// Sum of g * area of the glazing between this zone and any pseudo-zone.
    pub solar_aperture: Area,
    pub boundary_group_index: Option<usize>, // Groups nodes belonging to the same boundary, only for display
}

impl Node {
    /// Temperature of the node is given from outside, not simulated.
    pub fn is_pseudo(&self) -> bool {
        self.heat_capacity.is_infinite()
    }

    /// Node takes part in the simulation as a state.
    pub fn is_state(&self) -> bool {
        let heat_capacity = self.heat_capacity.get::<joule_per_kelvin>();
        heat_capacity > 0.0 && heat_capacity.is_finite()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Edge {
    pub conductance: ThermalConductance,
}

#[derive(Clone, Debug)]
pub struct NetworkOptions {
    /// Heat transfer coefficient of the air film on both faces of layered boundaries,
    /// `None` disables the films.
    pub surface_heat_transfer: Option<HeatTransfer>,
    /// Heat capacity used for simulated zones whose air has less (zero volume zones).
    pub min_zone_heat_capacity: HeatCapacity,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            surface_heat_transfer: Some(air_convection_heat_transfer(
                Velocity::new::<meter_per_second>(0.0),
            )),
            min_zone_heat_capacity: HeatCapacity::new::<joule_per_kelvin>(1000.0),
        }
    }
}

/// Thermal network of a model. Zone nodes come first in the order of zone
/// declaration, boundary nodes follow in the order of boundary declaration.
#[derive(Clone, Debug)]
pub struct RcNetwork {
    pub graph: UnGraph<Node, Edge>,

    /// Mapping of zone names to node indices.
    /// Used to reference named nodes in the graph
    pub zone_indices: IndexMap<String, NodeIndex>,

    /// Mapping of (zone name, marker) pairs to node indices
    pub marker_indices: MultiMap<(String, String), NodeIndex>,
}

#[derive(Copy, Clone, Debug)]
pub struct DotDisplayer<'a> {
    rc_network: &'a RcNetwork,
}

impl<'a> fmt::Display for DotDisplayer<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.rc_network.graph;

        let mut ungrouped_nodes: Vec<_> = Vec::new();
        let mut grouped_nodes: Vec<Vec<_>> = Vec::new();

        for (index, node) in g.node_references() {
            let index = g.to_index(index);
            if let Some(boundary_group_index) = node.boundary_group_index {
                if grouped_nodes.len() <= boundary_group_index {
                    grouped_nodes.resize_with(boundary_group_index + 1, Default::default);
                }
                grouped_nodes[boundary_group_index].push((index, node));
            } else {
                ungrouped_nodes.push((index, node));
            }
        }

        writeln!(f, "graph {{")?;
        for (index, node) in ungrouped_nodes {
            writeln!(f, "    node_{} [ label = \"{}\" ]", index, node)?;
        }

        for (index, group) in grouped_nodes.iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            writeln!(f, "    subgraph cluster_{} {{", index)?;
            for (index, node) in group {
                writeln!(f, "        node_{} [ label = \"{}\" ]", index, node)?;
            }
            writeln!(f, "    }}")?;
        }

        for edge in g.edge_references() {
            writeln!(
                f,
                "    node_{} -- node_{} [ label = \"{}\" ]",
                g.to_index(edge.source()),
                g.to_index(edge.target()),
                edge.weight()
            )?
        }

        writeln!(f, "}}")
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\n", self.name)?;
        for (zone, marker) in &self.markers {
            write!(f, "{zone}/{marker}\\n")?;
        }
        write!(f, "{} J/K", self.heat_capacity.get::<joule_per_kelvin>())
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} W/K", self.conductance.get::<watt_per_kelvin>())
    }
}

impl<'a> RcNetwork {
    pub fn to_dot(&'a self) -> DotDisplayer<'a> {
        DotDisplayer { rc_network: self }
    }
}

impl TryFrom<&Model> for RcNetwork {
    type Error = ModelError;
    fn try_from(model: &Model) -> Result<Self, Self::Error> {
        RcNetwork::new(model, &NetworkOptions::default())
    }
}

impl RcNetwork {
    pub fn new(model: &Model, options: &NetworkOptions) -> ModelResult<Self> {
        let min_heat_capacity = options.min_zone_heat_capacity.get::<joule_per_kelvin>();
        if !(min_heat_capacity > 0.0 && min_heat_capacity.is_finite()) {
            return Err(ModelError::invalid_argument(
                "minimal zone heat capacity must be positive and finite",
            ));
        }
        if let Some(h) = options.surface_heat_transfer {
            let h = h.get::<watt_per_square_meter_kelvin>();
            if !(h > 0.0 && h.is_finite()) {
                return Err(ModelError::invalid_argument(
                    "surface heat transfer coefficient must be positive and finite",
                ));
            }
        }

        let mut graph = UnGraph::default();
        let zone_indices: IndexMap<_, _> = model
            .zones
            .iter()
            .map(|(name, zone)| {
                let mut heat_capacity = zone.heat_capacity(&model.air);
                if !zone.is_pseudo() && heat_capacity < options.min_zone_heat_capacity {
                    debug!(zone = %name, "using minimal heat capacity for zone");
                    heat_capacity = options.min_zone_heat_capacity;
                }
                (
                    name.clone(),
                    graph.add_node(Node {
                        name: name.clone(),
                        zone_name: Some(name.clone()),
                        markers: Vec::new(),
                        heat_capacity,
                        area: Area::default(),
                        solar_aperture: Area::default(),
                        boundary_group_index: None,
                    }),
                )
            })
            .collect();
        let mut marker_indices = MultiMap::new();

        for (index, boundary) in model.boundaries.iter().enumerate() {
            let mut builder = ElementBuilder {
                graph: &mut graph,
                marker_indices: &mut marker_indices,
                zone1_node: zone_indices[&boundary.zones[0].name],
                zone2_node: zone_indices[&boundary.zones[1].name],
                zone1_name: &boundary.zones[0].name,
                surface_heat_transfer: options.surface_heat_transfer,
                group_index: index,
            };

            // An opaque part fully displaced by openings has no nodes, a boundary
            // declared with zero area keeps its (inactive) nodes.
            let net_area = boundary.net_area();
            if boundary.area.get::<square_meter>() == 0.0 || net_area.get::<square_meter>() > 0.0 {
                builder.add_element(
                    &format!("{}:{}", index, boundary.boundary_type.name()),
                    &boundary.boundary_type,
                    net_area,
                )?;
            }

            for (sub_index, sub_boundary) in boundary.sub_boundaries.iter().enumerate() {
                builder.add_element(
                    &format!(
                        "{}.{}:{}",
                        index,
                        sub_index,
                        sub_boundary.boundary_type.name()
                    ),
                    &sub_boundary.boundary_type,
                    sub_boundary.area,
                )?;
            }
        }

        for zone in model.inner_zones() {
            if graph.edges(zone_indices[&zone.name]).next().is_none() {
                warn!(zone = %zone.name, "zone is not connected to anything");
            }
        }

        Ok(RcNetwork {
            graph,
            zone_indices,
            marker_indices,
        })
    }
}

/// Helper for adding nodes and edges of one boundary.
/// This exists only to hold the arguments in a slightly organized fashion
/// (and avoid Clippy complaints about too many arguments being passed to a function).
struct ElementBuilder<'a> {
    graph: &'a mut UnGraph<Node, Edge>,
    marker_indices: &'a mut MultiMap<(String, String), NodeIndex>,
    zone1_node: NodeIndex,
    zone2_node: NodeIndex,
    zone1_name: &'a str,
    surface_heat_transfer: Option<HeatTransfer>,
    group_index: usize,
}

impl<'a> ElementBuilder<'a> {
    /// Add the nodes and edges of one construction spanning the two zones of the boundary.
    fn add_element(
        &mut self,
        label: &str,
        boundary_type: &BoundaryType,
        area: Area,
    ) -> ModelResult<()> {
        match resolve_construction(boundary_type, area)? {
            ResolvedConstruction::Resistive {
                resistance,
                solar_transmittance,
            } => {
                self.add_parallel_edge(resistance.recip());

                let zone1_pseudo = self.graph[self.zone1_node].is_pseudo();
                let zone2_pseudo = self.graph[self.zone2_node].is_pseudo();
                let inner_zone = match (zone1_pseudo, zone2_pseudo) {
                    (false, true) => Some(self.zone1_node),
                    (true, false) => Some(self.zone2_node),
                    _ => None,
                };
                if let Some(inner_zone) = inner_zone {
                    self.graph[inner_zone].solar_aperture += solar_transmittance * area;
                }
            }
            resolved @ ResolvedConstruction::Massive { .. } => {
                self.add_massive_element(label, &resolved, area)
            }
        }
        Ok(())
    }

    fn add_massive_element(&mut self, label: &str, resolved: &ResolvedConstruction, area: Area) {
        let (Some([outer, middle, inner]), ResolvedConstruction::Massive { halves, .. }) =
            (resolved.segment_conductances(), resolved)
        else {
            return;
        };

        let (outer, inner) = match self.surface_heat_transfer {
            Some(h) => (
                reciprocal_sum!(h * area, outer),
                reciprocal_sum!(inner, h * area),
            ),
            None => (outer, inner),
        };

        let outer_node = self.add_boundary_node(
            format!("{}/outer", label),
            halves[0].heat_capacity,
            &halves[0].markers,
            area,
        );
        let inner_node = self.add_boundary_node(
            format!("{}/inner", label),
            halves[1].heat_capacity,
            &halves[1].markers,
            area,
        );

        self.graph
            .add_edge(self.zone1_node, outer_node, Edge { conductance: outer });
        self.graph
            .add_edge(outer_node, inner_node, Edge { conductance: middle });
        self.graph
            .add_edge(inner_node, self.zone2_node, Edge { conductance: inner });
    }

    /// Add a new node inside a boundary and register its markers.
    fn add_boundary_node(
        &mut self,
        name: String,
        heat_capacity: HeatCapacity,
        markers: &[String],
        area: Area,
    ) -> NodeIndex {
        let mut node_markers: Vec<(String, String)> = Vec::with_capacity(markers.len());
        for marker in markers {
            let marker = (self.zone1_name.to_string(), marker.clone());
            if !node_markers.contains(&marker) {
                node_markers.push(marker);
            }
        }

        let node = self.graph.add_node(Node {
            name,
            zone_name: None,
            markers: node_markers.clone(),
            heat_capacity,
            area,
            solar_aperture: Area::default(),
            boundary_group_index: Some(self.group_index),
        });

        for marker in node_markers {
            self.marker_indices.insert(marker, node);
        }

        node
    }

    /// Connect the two zones directly; conductances of elements between the same
    /// pair of zones add up in a single edge. Open elements add no edge.
    fn add_parallel_edge(&mut self, conductance: ThermalConductance) {
        match self.graph.find_edge(self.zone1_node, self.zone2_node) {
            Some(edge) => self.graph[edge].conductance += conductance,
            None if conductance.get::<watt_per_kelvin>() == 0.0 => {}
            None => {
                self.graph
                    .add_edge(self.zone1_node, self.zone2_node, Edge { conductance });
            }
        }
    }
}
