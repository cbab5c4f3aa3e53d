//! Reduction of boundary constructions into lumped resistances and capacitances.
//!
//! A massive construction is split into two halves of equal thermal resistance
//! (3R2C). Each half becomes one capacitive node placed in the resistive middle
//! of the half, so the construction turns into three resistive segments
//! (`R/4`, `R/2`, `R/4`) and two capacities holding the mass of their half.
//! Resistive-only constructions have no node at all.

use std::sync::Arc;

use uom::si::{
    area::square_meter,
    f64::{Area, HeatCapacity, Ratio, ThermalConductance},
    length::meter,
    thermal_conductivity::watt_per_meter_kelvin,
};

use crate::error::{ModelError, ModelResult};
use crate::model::{BoundaryType, Layer};
use crate::tools::ThermalResistance;

/// One of the two lumped halves of a massive construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstructionHalf {
    pub resistance: ThermalResistance,
    pub heat_capacity: HeatCapacity,
    /// Names of marker layers positioned inside this half, in layer order.
    pub markers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedConstruction {
    Massive {
        resistance: ThermalResistance,
        heat_capacity: HeatCapacity,
        /// Half facing the first zone of the boundary, then the half facing the second one.
        halves: [ConstructionHalf; 2],
    },
    Resistive {
        resistance: ThermalResistance,
        solar_transmittance: Ratio,
    },
}

impl ResolvedConstruction {
    pub fn resistance(&self) -> ThermalResistance {
        match self {
            ResolvedConstruction::Massive { resistance, .. } => *resistance,
            ResolvedConstruction::Resistive { resistance, .. } => *resistance,
        }
    }

    /// Total heat capacity, zero for resistive-only constructions.
    pub fn heat_capacity(&self) -> HeatCapacity {
        match self {
            ResolvedConstruction::Massive { heat_capacity, .. } => *heat_capacity,
            ResolvedConstruction::Resistive { .. } => HeatCapacity::default(),
        }
    }

    /// Conductance of the whole construction, zero for a zero area.
    pub fn conductance(&self) -> ThermalConductance {
        self.resistance().recip()
    }

    /// Conductances of the outer, middle and inner segment of a massive construction.
    pub fn segment_conductances(&self) -> Option<[ThermalConductance; 3]> {
        match self {
            ResolvedConstruction::Massive { halves, .. } => {
                let [outer, inner] = halves;
                Some([
                    (outer.resistance / 2.0).recip(),
                    (outer.resistance / 2.0 + inner.resistance / 2.0).recip(),
                    (inner.resistance / 2.0).recip(),
                ])
            }
            ResolvedConstruction::Resistive { .. } => None,
        }
    }
}

/// Resolve a construction used with the given area into its lumped values.
pub fn resolve_construction(
    boundary_type: &BoundaryType,
    area: Area,
) -> ModelResult<ResolvedConstruction> {
    let area_value = area.get::<square_meter>();
    if !(area_value >= 0.0 && area_value.is_finite()) {
        return Err(ModelError::invalid_argument(format!(
            "construction {:?} needs a finite non-negative area, got {}",
            boundary_type.name(),
            area_value
        )));
    }

    match boundary_type {
        BoundaryType::Simple { u, g, .. } => Ok(ResolvedConstruction::Resistive {
            resistance: (*u * area).recip(),
            solar_transmittance: *g,
        }),
        BoundaryType::Layered { name, layers } => resolve_layers(name, layers, area),
    }
}

/// Resolve several layered constructions stacked on one interface, in order.
pub fn resolve_stacked_construction(
    boundary_types: &[Arc<BoundaryType>],
    area: Area,
) -> ModelResult<ResolvedConstruction> {
    resolve_construction(&BoundaryType::stack(boundary_types)?, area)
}

fn resolve_layers(name: &str, layers: &[Layer], area: Area) -> ModelResult<ResolvedConstruction> {
    // Positions along the construction are measured in area-independent resistance.
    let specific_resistance = |layer: &crate::model::BoundaryLayer| {
        layer.thickness.get::<meter>()
            / layer
                .material
                .thermal_conductivity
                .get::<watt_per_meter_kelvin>()
    };
    let total: f64 = layers
        .iter()
        .filter_map(Layer::material)
        .map(specific_resistance)
        .sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(ModelError::configuration(format!(
            "Boundary type {:?} has no resistance",
            name
        )));
    }
    let midpoint = total / 2.0;

    let mut halves = [empty_half(), empty_half()];
    let mut position = 0.0;
    for layer in layers {
        match layer {
            Layer::Marker(marker) => {
                let half = if position <= midpoint { 0 } else { 1 };
                halves[half].markers.push(marker.clone());
            }
            Layer::Material(layer) => {
                let layer_resistance = specific_resistance(layer);
                let end = position + layer_resistance;
                if end <= midpoint {
                    add_to_half(&mut halves[0], layer.resistance(area), layer.heat_capacity(area));
                } else if position >= midpoint {
                    add_to_half(&mut halves[1], layer.resistance(area), layer.heat_capacity(area));
                } else {
                    // The layer straddles the midpoint, split it by resistance fraction.
                    let fraction = (midpoint - position) / layer_resistance;
                    add_to_half(
                        &mut halves[0],
                        layer.resistance(area) * fraction,
                        layer.heat_capacity(area) * fraction,
                    );
                    add_to_half(
                        &mut halves[1],
                        layer.resistance(area) * (1.0 - fraction),
                        layer.heat_capacity(area) * (1.0 - fraction),
                    );
                }
                position = end;
            }
        }
    }

    Ok(ResolvedConstruction::Massive {
        resistance: layers
            .iter()
            .filter_map(Layer::material)
            .map(|layer| layer.resistance(area))
            .fold(ThermalResistance::default(), |acc, r| acc + r),
        heat_capacity: layers
            .iter()
            .filter_map(Layer::material)
            .map(|layer| layer.heat_capacity(area))
            .sum(),
        halves,
    })
}

fn empty_half() -> ConstructionHalf {
    ConstructionHalf {
        resistance: ThermalResistance::default(),
        heat_capacity: HeatCapacity::default(),
        markers: Vec::new(),
    }
}

fn add_to_half(half: &mut ConstructionHalf, resistance: ThermalResistance, heat_capacity: HeatCapacity) {
    half.resistance += resistance;
    half.heat_capacity += heat_capacity;
}
