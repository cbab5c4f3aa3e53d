use typenum::{N1, N2, P1, P3, Z0};
use uom::si::{
    f64::{HeatTransfer, Velocity},
    heat_transfer::watt_per_square_meter_kelvin,
    velocity::meter_per_second,
    Quantity, ISQ, SI,
};

/// Thermal resistance, base unit is Kelvin/Watt
pub type ThermalResistance = Quantity<
    ISQ<
        N2, // length
        N1, // mass
        P3, // time
        Z0, // electric current
        P1, // thermodynamic temperature
        Z0, // amount of substance
        Z0, // luminous intensity
    >,
    SI<f64>,
    f64,
>;

/// Calculate reciprocal sum of reciprocals.
/// Accepts >=2 arguments.
/// If the values are resistances, then the output is resistance when
/// connected in parallel.
/// If the values are conductances, then the output is conductance when
/// connected in series.
/// Zero conductance anywhere in the chain gives zero conductance.
macro_rules! reciprocal_sum {
    ($head:expr, $( $tail:expr ),+) => {
        ($head.recip() $(+ $tail.recip())*).recip()
    }
}
pub(crate) use reciprocal_sum; // Make the macro visible

/// Return heat transfer coefficient of a surface in air.
/// Based on https://www.engineeringtoolbox.com/convective-heat-transfer-d_430.html
pub fn air_convection_heat_transfer(wind_speed: Velocity) -> HeatTransfer {
    // The calculation is done outside of UOM, because the coefficient units would be awkward
    let wind_speed = wind_speed.get::<meter_per_second>();
    HeatTransfer::new::<watt_per_square_meter_kelvin>(
        12.12 - 1.16 * wind_speed + 11.6 * wind_speed.sqrt(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_ulps_eq};
    use proptest::prelude::prop;
    use test_case::test_case;
    use test_strategy::proptest;
    use uom::si::{f64::ThermalConductance, thermal_conductance::watt_per_kelvin};

    #[test]
    fn reciprocal_sum_four_identical() {
        assert_eq!(reciprocal_sum!(2.0f64, 2.0f64, 2.0f64, 2.0f64), 0.5);
    }

    #[test]
    fn reciprocal_sum_with_open_link_is_open() {
        let open = ThermalConductance::new::<watt_per_kelvin>(0.0);
        let closed = ThermalConductance::new::<watt_per_kelvin>(3.0);
        assert_eq!(
            reciprocal_sum!(closed, open, closed).get::<watt_per_kelvin>(),
            0.0
        );
    }

    #[proptest]
    fn reciprocal_sum_pairwise_vs_vec(
        #[strategy(prop::collection::vec(prop::num::f64::NORMAL, 1..100))] values: Vec<f64>,
    ) {
        let pairwise = values
            .iter()
            .copied()
            .reduce(|a, b| reciprocal_sum!(a, b))
            .unwrap();
        let expected = values.iter().map(|x| x.recip()).sum::<f64>().recip();
        assert_ulps_eq!(pairwise, expected);
    }

    // The test values are taken from the illustration graph in the source articles,
    // converted to pairs using web plot digitizer. The plot is imprecise,
    // forcing this test to have a high tolerance.
    #[test_case( 3.0, 27.4; "example1")]
    #[test_case( 8.0, 35.2; "example2")]
    #[test_case(13.0, 39.3; "example3")]
    #[test_case(18.0, 41.6; "example4")]
    fn air_convection_example(air_velocity: f64, expected_heat_transfer: f64) {
        let heat_transfer =
            air_convection_heat_transfer(Velocity::new::<meter_per_second>(air_velocity));
        assert_abs_diff_eq!(
            heat_transfer.get::<watt_per_square_meter_kelvin>(),
            expected_heat_transfer,
            epsilon = 1.5
        );
    }
}
