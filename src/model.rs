use std::fs;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;
use uom::si::{
    area::square_meter,
    f64::{
        Area, HeatCapacity, HeatTransfer, Length, MassDensity, Ratio, SpecificHeatCapacity,
        ThermalConductance, ThermalConductivity, Volume,
    },
    heat_transfer::watt_per_square_meter_kelvin,
    length::meter,
    mass_density::kilogram_per_cubic_meter,
    ratio::ratio,
    specific_heat_capacity::joule_per_kilogram_kelvin,
    thermal_conductivity::watt_per_meter_kelvin,
    volume::cubic_meter,
};

use crate::error::{ModelError, ModelResult};
use crate::tools::ThermalResistance;

#[cfg(test)]
use proptest::{
    arbitrary::Arbitrary,
    prelude::prop,
    strategy::{BoxedStrategy, Strategy},
};

/// Pseudo-zones that every model has, even if the configuration doesn't declare them.
pub const IMPLICIT_PSEUDO_ZONES: [&str; 2] = ["outside", "ground"];

/// Input names every simulated zone has (`<zone>/solar`, ...). Markers and
/// adjacent zones can't use them, their inputs share the `<zone>/` prefix.
pub const RESERVED_INPUT_SUFFIXES: [&str; 3] = ["solar", "internal", "hvac"];

/// Validated, immutable building description.
/// All maps keep the declaration order of the source document.
#[derive(Clone, Debug)]
pub struct Model {
    pub materials: IndexMap<String, Arc<Material>>,
    pub boundary_types: IndexMap<String, Arc<BoundaryType>>,
    pub zones: IndexMap<String, Arc<Zone>>,
    pub boundaries: Vec<Boundary>,
    pub air: Arc<Material>,
}

impl Model {
    pub fn load<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        let string = fs::read_to_string(path)?;
        Self::from_json(&string)
    }

    pub fn from_json(json: &str) -> ModelResult<Self> {
        let loaded: as_loaded::Model = json5::from_str(json)?;
        loaded.try_into()
    }

    /// Zones that are simulated (have their own air node state).
    pub fn inner_zones(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values().filter(|zone| !zone.is_pseudo())
    }

    /// Zones whose temperature is an input of the simulation.
    pub fn pseudo_zones(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values().filter(|zone| zone.is_pseudo())
    }
}

impl TryFrom<as_loaded::Model> for Model {
    type Error = ModelError;
    fn try_from(value: as_loaded::Model) -> Result<Self, Self::Error> {
        let mut converted_materials = value
            .materials
            .into_iter()
            .map(|(name, material)| Ok((name.clone(), Arc::new(material.convert(name)?))))
            .collect::<ModelResult<IndexMap<_, _>>>()?;

        let default_air = Material::default_air();
        if !converted_materials.contains_key(&default_air.name) {
            converted_materials.insert(default_air.name.clone(), Arc::new(default_air));
        }

        let converted_boundary_types = value
            .boundary_types
            .into_iter()
            .map(|(name, boundary_type)| {
                Ok((
                    name.clone(),
                    Arc::new(boundary_type.convert(name, &converted_materials)?),
                ))
            })
            .collect::<ModelResult<IndexMap<_, _>>>()?;

        let mut converted_zones = IndexMap::new();
        let mut adjacent = Vec::new();

        for (zone_name, zone) in value.zones.into_iter() {
            let zone_volume = match zone {
                as_loaded::Zone::Inner {
                    volume,
                    adjacent_zones,
                } => {
                    if !(volume.get::<cubic_meter>() >= 0.0 && volume.is_finite()) {
                        return Err(ModelError::configuration(format!(
                            "Zone {:?} has invalid volume {:?}",
                            zone_name, volume
                        )));
                    }
                    adjacent.extend(
                        adjacent_zones
                            .into_iter()
                            .map(|adjacent_zone| (zone_name.clone(), adjacent_zone)),
                    );
                    Some(volume)
                }
                as_loaded::Zone::Outer => None,
            };
            converted_zones.insert(
                zone_name.clone(),
                Arc::new(Zone {
                    name: zone_name,
                    volume: zone_volume,
                }),
            );
        }

        for name in IMPLICIT_PSEUDO_ZONES {
            if !converted_zones.contains_key(name) {
                converted_zones.insert(name.into(), Arc::new(Zone::pseudo(name)));
            }
        }

        // Adjacent zones are unmodelled neighbouring spaces, their temperature is an input.
        let mut adjacent_boundaries = Vec::with_capacity(adjacent.len());
        for (zone_name, adjacent_zone) in adjacent {
            let described = format!(
                "Adjacent zone {:?} of zone {:?}",
                adjacent_zone.suffix, zone_name
            );
            if RESERVED_INPUT_SUFFIXES.contains(&adjacent_zone.suffix.as_str()) {
                return Err(ModelError::configuration(format!(
                    "{} uses a reserved input name",
                    described
                )));
            }
            let adj_zone_name = format!("{}/{}", zone_name, adjacent_zone.suffix);
            if converted_zones.contains_key(&adj_zone_name) {
                return Err(ModelError::configuration(format!(
                    "{} collides with an existing zone {:?}",
                    described, adj_zone_name
                )));
            }
            let boundary_type = converted_boundary_types
                .get(&adjacent_zone.boundary_type)
                .map(Arc::clone)
                .ok_or_else(|| {
                    ModelError::configuration(format!(
                        "{} references unknown boundary type {:?}",
                        described, adjacent_zone.boundary_type
                    ))
                })?;
            let area = adjacent_zone.area.get::<square_meter>();
            if !(area >= 0.0 && area.is_finite()) {
                return Err(ModelError::configuration(format!(
                    "{} has invalid area {}",
                    described, area
                )));
            }

            let adj_zone_rc = Arc::new(Zone::pseudo(&adj_zone_name));
            converted_zones.insert(adj_zone_name, Arc::clone(&adj_zone_rc));
            adjacent_boundaries.push(Boundary {
                boundary_type,
                zones: [Arc::clone(&converted_zones[&zone_name]), adj_zone_rc],
                area: adjacent_zone.area,
                sub_boundaries: Vec::new(),
            });
        }

        let mut converted_boundaries = value
            .boundaries
            .into_iter()
            .enumerate()
            .map(|(index, boundary)| {
                boundary.convert(index, &converted_zones, &converted_boundary_types)
            })
            .collect::<ModelResult<Vec<_>>>()?;
        converted_boundaries.extend(adjacent_boundaries);

        let air = Arc::clone(&converted_materials["air"]);

        Ok(Model {
            materials: converted_materials,
            boundary_types: converted_boundary_types,
            zones: converted_zones,
            boundaries: converted_boundaries,
            air,
        })
    }
}

#[cfg(test)]
impl Arbitrary for Model {
    type Parameters = ();
    type Strategy = BoxedStrategy<Model>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop::collection::vec(Material::arbitrary().prop_map(Arc::new), 1..10)
            .prop_flat_map(|materials| {
                let materials = Arc::new(materials);
                (
                    prop::strategy::Just(Arc::clone(&materials)),
                    prop::collection::vec(
                        BoundaryType::arbitrary_with(materials).prop_map(Arc::new),
                        1..20,
                    ),
                    (2usize..10).prop_flat_map(|count| {
                        (0..count)
                            .map(|index| Zone::arbitrary_with(index).prop_map(Arc::new))
                            .collect::<Vec<_>>()
                    }),
                )
            })
            .prop_flat_map(|(materials, boundary_types, zones)| {
                let boundary_types = Arc::new(boundary_types);
                let zones = Arc::new(zones);
                (
                    prop::strategy::Just(materials),
                    prop::strategy::Just(Arc::clone(&boundary_types)),
                    prop::strategy::Just(Arc::clone(&zones)),
                    prop::collection::vec(Boundary::arbitrary_with((boundary_types, zones)), 1..10),
                )
            })
            .prop_map(|(materials, boundary_types, zones, boundaries)| {
                let mut zones: IndexMap<_, _> = zones
                    .iter()
                    .map(|z| (z.name.clone(), Arc::clone(z)))
                    .collect();
                for name in IMPLICIT_PSEUDO_ZONES {
                    zones.insert(name.into(), Arc::new(Zone::pseudo(name)));
                }
                Model {
                    materials: materials
                        .iter()
                        .map(|m| (m.name.clone(), Arc::clone(m)))
                        .collect(),
                    boundary_types: boundary_types
                        .iter()
                        .map(|bt| (bt.name().to_string(), Arc::clone(bt)))
                        .collect(),
                    zones,
                    boundaries,
                    air: Arc::clone(&materials[0]),
                }
            })
            .boxed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    pub name: String,
    /// `None` for pseudo-zones (outside, ground, unmodelled neighbours).
    pub volume: Option<Volume>,
}

impl Zone {
    pub fn pseudo(name: &str) -> Zone {
        Zone {
            name: name.into(),
            volume: None,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.volume.is_none()
    }

    /// Heat capacity of the zone air, infinite for pseudo-zones.
    pub fn heat_capacity(&self, air: &Material) -> HeatCapacity {
        self.volume
            .unwrap_or_else(|| Volume::new::<cubic_meter>(f64::INFINITY))
            * air.density
            * air.specific_heat_capacity
    }
}

#[cfg(test)]
impl Arbitrary for Zone {
    /// Index of the zone, used to generate an unique name.
    type Parameters = usize;
    type Strategy = BoxedStrategy<Zone>;

    fn arbitrary_with(index: usize) -> Self::Strategy {
        prop::option::of(prop::strategy::Union::new_weighted(vec![
            (1, prop::strategy::Just(0f64).boxed()),
            (9, (0.1f64..1000f64).boxed()),
        ]))
        .prop_map(move |volume| Zone {
            name: format!("z{}", index),
            volume: volume.map(Volume::new::<cubic_meter>),
        })
        .boxed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Boundary {
    pub boundary_type: Arc<BoundaryType>,
    pub zones: [Arc<Zone>; 2],
    pub area: Area,
    pub sub_boundaries: Vec<SubBoundary>,
}

impl Boundary {
    /// Area of the parent construction after the openings are cut out.
    pub fn net_area(&self) -> Area {
        let sub_area: f64 = self
            .sub_boundaries
            .iter()
            .map(|sub| sub.area.get::<square_meter>())
            .sum();
        Area::new::<square_meter>((self.area.get::<square_meter>() - sub_area).max(0.0))
    }
}

#[cfg(test)]
impl Arbitrary for Boundary {
    type Parameters = (Arc<Vec<Arc<BoundaryType>>>, Arc<Vec<Arc<Zone>>>);
    type Strategy = BoxedStrategy<Boundary>;

    fn arbitrary_with(params: (Arc<Vec<Arc<BoundaryType>>>, Arc<Vec<Arc<Zone>>>)) -> Self::Strategy {
        let (boundary_types, zones) = params;
        assert!(!boundary_types.is_empty());
        assert!(zones.len() > 1);
        (
            0..boundary_types.len(),
            0..zones.len(),
            0..(zones.len() - 1),
            prop::strategy::Union::new_weighted(vec![
                (1, prop::strategy::Just(0f64).boxed()),
                (9, (1e-3f64..1000f64).boxed()),
            ]),
            prop::collection::vec((0..boundary_types.len(), 0f64..1f64), 0..3),
        )
            .prop_map(move |params| {
                let z1 = params.1;
                let z2 = if params.2 < params.1 {
                    params.2
                } else {
                    params.2 + 1
                };
                assert_ne!(z1, z2);
                let area = params.3;
                let fraction_sum: f64 = params.4.iter().map(|(_, fraction)| fraction).sum();
                let scale = area / fraction_sum.max(1.0);
                Boundary {
                    boundary_type: Arc::clone(&boundary_types[params.0]),
                    zones: [Arc::clone(&zones[z1]), Arc::clone(&zones[z2])],
                    area: Area::new::<square_meter>(area),
                    sub_boundaries: params
                        .4
                        .iter()
                        .map(|(index, fraction)| SubBoundary {
                            boundary_type: Arc::clone(&boundary_types[*index]),
                            area: Area::new::<square_meter>(fraction * scale),
                        })
                        .collect(),
                }
            })
            .boxed()
    }
}

/// Opening (window, door) cut out of a parent boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct SubBoundary {
    pub boundary_type: Arc<BoundaryType>,
    pub area: Area,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoundaryType {
    /// Massive construction, layers are ordered from the first zone of a boundary
    /// towards the second one.
    Layered { name: String, layers: Vec<Layer> },
    /// Resistive-only construction (windows, doors) without thermal mass.
    Simple {
        name: String,
        u: HeatTransfer,
        g: Ratio,
    },
}

impl BoundaryType {
    pub fn name(&self) -> &str {
        match self {
            BoundaryType::Layered { name, .. } => name,
            BoundaryType::Simple { name, .. } => name,
        }
    }

    /// Combine layered boundary types sharing one interface into a single one,
    /// stacking their layers in the given order.
    pub fn stack(boundary_types: &[Arc<BoundaryType>]) -> ModelResult<BoundaryType> {
        match boundary_types {
            [] => Err(ModelError::configuration("Cannot stack an empty list of boundary types")),
            [single] => Ok(single.as_ref().clone()),
            _ => {
                let mut layers = Vec::new();
                for boundary_type in boundary_types {
                    match boundary_type.as_ref() {
                        BoundaryType::Layered {
                            layers: type_layers,
                            ..
                        } => layers.extend(type_layers.iter().cloned()),
                        BoundaryType::Simple { name, .. } => {
                            return Err(ModelError::configuration(format!(
                                "Cannot stack simple boundary type {:?}, only layered types can be combined",
                                name
                            )))
                        }
                    }
                }
                Ok(BoundaryType::Layered {
                    name: boundary_types.iter().map(|bt| bt.name()).join("+"),
                    layers,
                })
            }
        }
    }
}

#[cfg(test)]
impl Arbitrary for BoundaryType {
    type Parameters = Arc<Vec<Arc<Material>>>;
    type Strategy = BoxedStrategy<BoundaryType>;

    fn arbitrary_with(materials: Arc<Vec<Arc<Material>>>) -> Self::Strategy {
        ("[a-z]{1,8}", 1e-3f64..10f64, 0f64..1f64)
            .prop_map(|tuple| BoundaryType::Simple {
                name: tuple.0,
                u: HeatTransfer::new::<watt_per_square_meter_kelvin>(tuple.1),
                g: Ratio::new::<ratio>(tuple.2),
            })
            .boxed()
            .prop_union(
                (
                    "[a-z]{1,8}",
                    prop::collection::vec(Layer::arbitrary_with(materials), 1..10),
                )
                    .prop_filter("needs a material layer", |(_, layers)| {
                        layers.iter().any(|layer| layer.material().is_some())
                    })
                    .prop_map(|tuple| BoundaryType::Layered {
                        name: tuple.0,
                        layers: tuple.1,
                    })
                    .boxed(),
            )
            .boxed()
    }
}

/// One entry of a layered construction.
#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    Material(BoundaryLayer),
    /// Named position inside the construction (typically `heating`) where a heat
    /// flow input gets injected. Has no resistance and no mass.
    Marker(String),
}

impl Layer {
    pub fn material(&self) -> Option<&BoundaryLayer> {
        match self {
            Layer::Material(layer) => Some(layer),
            Layer::Marker(_) => None,
        }
    }
}

#[cfg(test)]
impl Arbitrary for Layer {
    type Parameters = Arc<Vec<Arc<Material>>>;
    type Strategy = BoxedStrategy<Layer>;

    fn arbitrary_with(materials: Arc<Vec<Arc<Material>>>) -> Self::Strategy {
        prop::strategy::Union::new_weighted(vec![
            (
                5,
                BoundaryLayer::arbitrary_with(materials)
                    .prop_map(Layer::Material)
                    .boxed(),
            ),
            (1, "heating|x|y".prop_map(Layer::Marker).boxed()),
        ])
        .boxed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryLayer {
    pub material: Arc<Material>,
    pub thickness: Length,
}

impl BoundaryLayer {
    pub fn heat_capacity(&self, area: Area) -> HeatCapacity {
        let volume = area * self.thickness;
        let material_mass = volume * self.material.density;
        material_mass * self.material.specific_heat_capacity
    }

    pub fn conductance(&self, area: Area) -> ThermalConductance {
        self.material.thermal_conductivity * area / self.thickness
    }

    pub fn resistance(&self, area: Area) -> ThermalResistance {
        self.thickness / (self.material.thermal_conductivity * area)
    }
}

#[cfg(test)]
impl Arbitrary for BoundaryLayer {
    type Parameters = Arc<Vec<Arc<Material>>>;
    type Strategy = BoxedStrategy<BoundaryLayer>;

    fn arbitrary_with(materials: Arc<Vec<Arc<Material>>>) -> Self::Strategy {
        assert!(!materials.is_empty());
        (0..materials.len(), 1e-3f64..1f64)
            .prop_map(move |tuple| BoundaryLayer {
                material: Arc::clone(&materials[tuple.0]),
                thickness: Length::new::<meter>(tuple.1),
            })
            .boxed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub thermal_conductivity: ThermalConductivity,
    pub specific_heat_capacity: SpecificHeatCapacity,
    pub density: MassDensity,
}

impl Material {
    /// Return a default implementation of air material, used if air is not
    /// explicitly defined in the model
    fn default_air() -> Material {
        Material {
            name: "air".into(),
            thermal_conductivity: ThermalConductivity::new::<watt_per_meter_kelvin>(0.026),
            specific_heat_capacity: SpecificHeatCapacity::new::<joule_per_kilogram_kelvin>(1012.0),
            density: MassDensity::new::<kilogram_per_cubic_meter>(1.199),
        }
    }
}

#[cfg(test)]
impl Arbitrary for Material {
    type Parameters = ();
    type Strategy = BoxedStrategy<Material>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            "[a-z]{1,8}",
            1e-2f64..100f64,
            1f64..5000f64,
            1f64..10000f64,
        )
            .prop_map(|tuple| Material {
                name: tuple.0,
                thermal_conductivity: ThermalConductivity::new::<watt_per_meter_kelvin>(tuple.1),
                specific_heat_capacity: SpecificHeatCapacity::new::<joule_per_kilogram_kelvin>(
                    tuple.2,
                ),
                density: MassDensity::new::<kilogram_per_cubic_meter>(tuple.3),
            })
            .boxed()
    }
}

fn positive(value: f64) -> bool {
    value > 0.0 && value.is_finite()
}

mod as_loaded {
    use approx::relative_eq;
    use serde::Deserialize;

    use super::*;

    #[derive(Clone, Debug, Deserialize)]
    pub struct Model {
        #[serde(default)]
        pub zones: IndexMap<String, Zone>,
        #[serde(default)]
        pub boundaries: Vec<Boundary>,
        #[serde(default)]
        pub materials: IndexMap<String, Material>,
        #[serde(default)]
        pub boundary_types: IndexMap<String, BoundaryType>,
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(untagged)]
    pub enum Zone {
        Inner {
            volume: Volume,
            #[serde(default)]
            adjacent_zones: Vec<AdjacentZone>,
        },
        Outer,
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct AdjacentZone {
        pub suffix: String,
        pub boundary_type: String,
        pub area: Area,
    }

    /// Either a single boundary type or a stack of layered types sharing one interface.
    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(untagged)]
    pub enum BoundaryTypeRef {
        One(String),
        Many(Vec<String>),
    }

    impl BoundaryTypeRef {
        fn resolve(
            self,
            index: usize,
            boundary_types: &IndexMap<String, Arc<super::BoundaryType>>,
        ) -> ModelResult<Arc<super::BoundaryType>> {
            let lookup = |name: &String| {
                boundary_types
                    .get(name)
                    .map(Arc::clone)
                    .ok_or_else(|| ModelError::UnknownConstruction {
                        boundary: index,
                        name: name.clone(),
                    })
            };
            match self {
                BoundaryTypeRef::One(name) => lookup(&name),
                BoundaryTypeRef::Many(names) if names.len() == 1 => lookup(&names[0]),
                BoundaryTypeRef::Many(names) => {
                    let boundary_types = names.iter().map(lookup).collect::<ModelResult<Vec<_>>>()?;
                    super::BoundaryType::stack(&boundary_types)
                        .map(Arc::new)
                        .map_err(|error| match error {
                            ModelError::Configuration { what } => ModelError::configuration(
                                format!("Boundary {}: {}", index, what),
                            ),
                            other => other,
                        })
                }
            }
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct Boundary {
        pub boundary_type: BoundaryTypeRef,
        pub zones: [String; 2],
        pub area: Area,
        #[serde(default)]
        pub sub_boundaries: Vec<SubBoundary>,
    }

    impl Boundary {
        pub fn convert(
            self,
            index: usize,
            zones: &IndexMap<String, Arc<super::Zone>>,
            boundary_types: &IndexMap<String, Arc<super::BoundaryType>>,
        ) -> ModelResult<super::Boundary> {
            let zone = |name: &String| {
                zones
                    .get(name)
                    .map(Arc::clone)
                    .ok_or_else(|| ModelError::UnknownZone {
                        boundary: index,
                        zone: name.clone(),
                    })
            };
            let zone_pair = [zone(&self.zones[0])?, zone(&self.zones[1])?];
            if zone_pair[0].name == zone_pair[1].name {
                return Err(ModelError::configuration(format!(
                    "Boundary {} connects zone {:?} to itself",
                    index, zone_pair[0].name
                )));
            }

            let boundary_type = self.boundary_type.resolve(index, boundary_types)?;

            let area = self.area.get::<square_meter>();
            if !(area >= 0.0 && area.is_finite()) {
                return Err(ModelError::configuration(format!(
                    "Boundary {} {:?} has invalid area {}",
                    index, self.zones, area
                )));
            }

            let mut sub_area = 0.0;
            let mut sub_boundaries = Vec::with_capacity(self.sub_boundaries.len());
            for sub_boundary in self.sub_boundaries {
                let area = sub_boundary.area.get::<square_meter>();
                if !(area >= 0.0 && area.is_finite()) {
                    return Err(ModelError::configuration(format!(
                        "Sub-boundary of boundary {} {:?} has invalid area {}",
                        index, self.zones, area
                    )));
                }
                sub_area += area;
                sub_boundaries.push(super::SubBoundary {
                    boundary_type: boundary_types
                        .get(&sub_boundary.boundary_type)
                        .map(Arc::clone)
                        .ok_or_else(|| ModelError::UnknownConstruction {
                            boundary: index,
                            name: sub_boundary.boundary_type.clone(),
                        })?,
                    area: sub_boundary.area,
                });
            }
            if sub_area > area && !relative_eq!(sub_area, area, max_relative = 1e-9) {
                return Err(ModelError::configuration(format!(
                    "Boundary {} {:?} has less area than the sum of its sub-boundaries",
                    index, self.zones
                )));
            }

            Ok(super::Boundary {
                boundary_type,
                zones: zone_pair,
                area: self.area,
                sub_boundaries,
            })
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct SubBoundary {
        pub boundary_type: String,
        pub area: Area,
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(untagged)]
    pub enum BoundaryType {
        /// Simple boundaries don't have any mass!
        Simple { u: HeatTransfer, g: Ratio },
        Layered {
            #[serde(default)]
            layers: Vec<Layer>,
        },
    }

    impl BoundaryType {
        pub fn convert(
            self,
            name: String,
            materials: &IndexMap<String, Arc<super::Material>>,
        ) -> ModelResult<super::BoundaryType> {
            Ok(match self {
                BoundaryType::Layered { layers }
                    if !layers.iter().any(|layer| matches!(layer, Layer::Material { .. })) =>
                {
                    return Err(ModelError::configuration(format!(
                        "Boundary type {:?} has no material layers",
                        name
                    )))
                }
                BoundaryType::Layered { layers } => super::BoundaryType::Layered {
                    layers: layers
                        .into_iter()
                        .map(|layer| layer.convert(&name, materials))
                        .collect::<ModelResult<Vec<_>>>()?,
                    name,
                },
                BoundaryType::Simple { u, g } => {
                    if !positive(u.get::<watt_per_square_meter_kelvin>()) {
                        return Err(ModelError::configuration(format!(
                            "Boundary type {:?} needs a positive u value",
                            name
                        )));
                    }
                    if !(0.0..=1.0).contains(&g.get::<ratio>()) {
                        return Err(ModelError::configuration(format!(
                            "Boundary type {:?} has g value outside of 0..=1",
                            name
                        )));
                    }
                    super::BoundaryType::Simple { name, u, g }
                }
            })
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(untagged)]
    pub enum Layer {
        Material { material: String, thickness: Length },
        Marker { marker: String },
    }

    impl Layer {
        pub fn convert(
            self,
            boundary_type: &str,
            materials: &IndexMap<String, Arc<super::Material>>,
        ) -> ModelResult<super::Layer> {
            Ok(match self {
                Layer::Material {
                    material,
                    thickness,
                } => {
                    if !positive(thickness.get::<meter>()) {
                        return Err(ModelError::configuration(format!(
                            "Layer of material {:?} in boundary type {:?} needs a positive thickness",
                            material, boundary_type
                        )));
                    }
                    super::Layer::Material(super::BoundaryLayer {
                        material: materials.get(&material).map(Arc::clone).ok_or_else(|| {
                            ModelError::configuration(format!(
                                "Could not find material {:?} used by boundary type {:?}",
                                material, boundary_type
                            ))
                        })?,
                        thickness,
                    })
                }
                Layer::Marker { marker } => {
                    if RESERVED_INPUT_SUFFIXES.contains(&marker.as_str()) {
                        return Err(ModelError::configuration(format!(
                            "Marker {:?} in boundary type {:?} uses a reserved input name",
                            marker, boundary_type
                        )));
                    }
                    super::Layer::Marker(marker)
                }
            })
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct Material {
        pub thermal_conductivity: ThermalConductivity,
        pub specific_heat_capacity: SpecificHeatCapacity,
        pub density: MassDensity,
    }

    impl Material {
        pub fn convert(self, name: String) -> ModelResult<super::Material> {
            let values = [
                self.thermal_conductivity.get::<watt_per_meter_kelvin>(),
                self.specific_heat_capacity
                    .get::<joule_per_kilogram_kelvin>(),
                self.density.get::<kilogram_per_cubic_meter>(),
            ];
            if !values.into_iter().all(positive) {
                return Err(ModelError::configuration(format!(
                    "Material {:?} needs positive conductivity, heat capacity and density",
                    name
                )));
            }
            Ok(super::Material {
                name,
                thermal_conductivity: self.thermal_conductivity,
                specific_heat_capacity: self.specific_heat_capacity,
                density: self.density,
            })
        }
    }
}
