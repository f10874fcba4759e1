//! Canonical field catalogue.
//!
//! Every value the collector stores is keyed by a [`Field`]: a static
//! descriptor carrying the canonical name together with the source that
//! produces it and the physical quantity it measures. Consumers ask the
//! descriptor for its unit instead of inspecting name suffixes.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Device,
    Rf,
    PowerMeter,
    Clock,
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    Temperature,
    SecondaryTemperature,
    Humidity,
    Power,
    AirSpeed,
    WindSpeed,
    WindDirection,
    Rain,
    UvIndex,
    Illuminance,
    Status,
    Daylight,
    TemperatureDifference,
    Efficiency,
    PowerPerDegree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Kelvin,
    Percent,
    Watts,
    FeetPerMinute,
    KilometresPerHour,
    Degrees,
    Millimetres,
    Index,
    Lux,
    Flag,
    Ratio,
    WattsPerKelvin,
}

impl Quantity {
    pub fn unit(self) -> Unit {
        match self {
            Quantity::Temperature | Quantity::SecondaryTemperature => Unit::Celsius,
            Quantity::Humidity => Unit::Percent,
            Quantity::Power => Unit::Watts,
            Quantity::AirSpeed => Unit::FeetPerMinute,
            Quantity::WindSpeed => Unit::KilometresPerHour,
            Quantity::WindDirection => Unit::Degrees,
            Quantity::Rain => Unit::Millimetres,
            Quantity::UvIndex => Unit::Index,
            Quantity::Illuminance => Unit::Lux,
            Quantity::Status | Quantity::Daylight => Unit::Flag,
            Quantity::TemperatureDifference => Unit::Kelvin,
            Quantity::Efficiency => Unit::Ratio,
            Quantity::PowerPerDegree => Unit::WattsPerKelvin,
        }
    }

    /// Name suffix used by raw fields of this quantity. Derived quantities
    /// have no suffix.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Quantity::Temperature => Some("T"),
            Quantity::SecondaryTemperature => Some("2_T"),
            Quantity::Humidity => Some("H"),
            Quantity::Power => Some("W"),
            Quantity::AirSpeed => Some("fpm"),
            Quantity::WindSpeed => Some("WS"),
            Quantity::WindDirection => Some("A"),
            Quantity::Rain => Some("R"),
            Quantity::UvIndex => Some("UV"),
            Quantity::Illuminance => Some("LUX"),
            Quantity::Status => Some("b"),
            Quantity::Daylight
            | Quantity::TemperatureDifference
            | Quantity::Efficiency
            | Quantity::PowerPerDegree => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Field {
    name: &'static str,
    source: Source,
    quantity: Quantity,
}

impl Field {
    pub const fn new(name: &'static str, source: Source, quantity: Quantity) -> Self {
        Self {
            name,
            source,
            quantity,
        }
    }

    const fn device(name: &'static str, quantity: Quantity) -> Self {
        Self::new(name, Source::Device, quantity)
    }

    const fn rf(name: &'static str, quantity: Quantity) -> Self {
        Self::new(name, Source::Rf, quantity)
    }

    const fn meter(name: &'static str) -> Self {
        Self::new(name, Source::PowerMeter, Quantity::Power)
    }

    const fn derived(name: &'static str, quantity: Quantity) -> Self {
        Self::new(name, Source::Derived, quantity)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn unit(&self) -> Unit {
        self.quantity.unit()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// Device channels read by the derived metrics.
pub const HP_W: Field = Field::device("HP_W", Quantity::Power);
pub const TAH_W: Field = Field::device("TAH_W", Quantity::Power);
pub const TAH_FPM: Field = Field::device("TAH_fpm", Quantity::AirSpeed);
pub const TAH_IN_T: Field = Field::device("TAH_in_T", Quantity::Temperature);
pub const TAH_OUT_T: Field = Field::device("TAH_out_T", Quantity::Temperature);
pub const LOOP_IN_T: Field = Field::device("loop_in_T", Quantity::Temperature);
pub const LOOP_OUT_T: Field = Field::device("loop_out_T", Quantity::Temperature);
pub const OUTSIDE_T: Field = Field::device("outside_T", Quantity::Temperature);
pub const LIVING_T: Field = Field::device("living_T", Quantity::Temperature);
pub const HEAT_1_B: Field = Field::device("heat_1_b", Quantity::Status);

// RF channels read by the derived metrics.
pub const FIREPLACE_T: Field = Field::rf("fireplace_T", Quantity::Temperature);
pub const D_ROOM_T: Field = Field::rf("D_room_T", Quantity::Temperature);
pub const V_ROOM_T: Field = Field::rf("V_room_T", Quantity::Temperature);
pub const T_ROOM_T: Field = Field::rf("T_room_T", Quantity::Temperature);
pub const WEATHER_STATION_R: Field = Field::rf("weather_station_R", Quantity::Rain);

// Power-meter circuits.
pub const HOUSE_W: Field = Field::meter("house_W");
pub const SOLAR_W: Field = Field::meter("solar_W");
pub const DEHUMIDIFIER_W: Field = Field::meter("dehumidifier_W");

pub const DAYLIGHT: Field = Field::new("daylight", Source::Clock, Quantity::Daylight);

pub const POWER_TOT: Field = Field::derived("power_tot", Quantity::Power);
pub const T_DIFF: Field = Field::derived("T_diff", Quantity::TemperatureDifference);
pub const T_DIFF_EFF: Field = Field::derived("T_diff_eff", Quantity::PowerPerDegree);
pub const COP: Field = Field::derived("COP", Quantity::Efficiency);
pub const WELL_W: Field = Field::derived("well_W", Quantity::Power);
pub const WELL_COP: Field = Field::derived("well_COP", Quantity::Efficiency);
pub const BASE_LOAD_W: Field = Field::derived("base_load_W", Quantity::Power);
pub const COP_MA: Field = Field::derived("COP_ma", Quantity::Efficiency);
pub const WELL_COP_MA: Field = Field::derived("well_COP_ma", Quantity::Efficiency);
pub const RAIN_ACCUM_R: Field = Field::derived("rain_accum_R", Quantity::Rain);

/// WEL `Device Name` attribute -> canonical field. The logger already uses
/// canonical names for its channels, except `power_tot` which some firmware
/// revisions compute on the device.
pub static DEVICE_TABLE: &[(&str, Field)] = &[
    ("HP_W", HP_W),
    ("TAH_W", TAH_W),
    ("TAH_fpm", TAH_FPM),
    ("TAH_in_T", TAH_IN_T),
    ("TAH_out_T", TAH_OUT_T),
    ("loop_in_T", LOOP_IN_T),
    ("loop_out_T", LOOP_OUT_T),
    ("outside_T", OUTSIDE_T),
    ("living_T", LIVING_T),
    ("liqu_refrig_T", Field::device("liqu_refrig_T", Quantity::Temperature)),
    ("gas_refrig_T", Field::device("gas_refrig_T", Quantity::Temperature)),
    ("desup_T", Field::device("desup_T", Quantity::Temperature)),
    ("desup_return_T", Field::device("desup_return_T", Quantity::Temperature)),
    ("house_hot_T", Field::device("house_hot_T", Quantity::Temperature)),
    ("buderus_h2o_T", Field::device("buderus_h2o_T", Quantity::Temperature)),
    ("wood_fire_T", Field::device("wood_fire_T", Quantity::Temperature)),
    ("tank_h2o_T", Field::device("tank_h2o_T", Quantity::Temperature)),
    ("trist_T", Field::device("trist_T", Quantity::Temperature)),
    ("base_T", Field::device("base_T", Quantity::Temperature)),
    ("aux_heat_b", Field::device("aux_heat_b", Quantity::Status)),
    ("heat_1_b", HEAT_1_B),
    ("heat_2_b", Field::device("heat_2_b", Quantity::Status)),
    ("rev_valve_b", Field::device("rev_valve_b", Quantity::Status)),
    ("TAH_fan_b", Field::device("TAH_fan_b", Quantity::Status)),
    ("humid_b", Field::device("humid_b", Quantity::Status)),
    ("zone_1_b", Field::device("zone_1_b", Quantity::Status)),
    ("zone_2_b", Field::device("zone_2_b", Quantity::Status)),
    ("power_tot", POWER_TOT),
];

/// Decoder quantity key -> catalogue quantity.
pub static RF_QUANTITIES: &[(&str, Quantity)] = &[
    ("temperature_C", Quantity::Temperature),
    ("temperature_1_C", Quantity::SecondaryTemperature),
    ("humidity", Quantity::Humidity),
    ("wind_avg_km_h", Quantity::WindSpeed),
    ("wind_dir_deg", Quantity::WindDirection),
    ("rain_mm", Quantity::Rain),
    ("uv", Quantity::UvIndex),
    ("lux", Quantity::Illuminance),
];

pub struct RfSensor {
    pub id: &'static str,
    pub location: &'static str,
    pub fields: &'static [(&'static str, Field)],
}

/// Stable `rtl_433` sensor ids (suffixed with `_<message_type>` for multi
/// message stations) and the decoder keys each one carries.
pub static RF_TABLE: &[RfSensor] = &[
    RfSensor {
        id: "2669",
        location: "D_room",
        fields: &[
            ("temperature_C", D_ROOM_T),
            ("humidity", Field::rf("D_room_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "13097",
        location: "V_room",
        fields: &[
            ("temperature_C", V_ROOM_T),
            ("humidity", Field::rf("V_room_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "7177",
        location: "T_room",
        fields: &[
            ("temperature_C", T_ROOM_T),
            ("humidity", Field::rf("T_room_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "13945",
        location: "fireplace",
        fields: &[
            ("temperature_C", FIREPLACE_T),
            ("humidity", Field::rf("fireplace_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "450_5",
        location: "weather_station",
        fields: &[
            ("wind_avg_km_h", Field::rf("weather_station_WS", Quantity::WindSpeed)),
            ("temperature_C", Field::rf("weather_station_T", Quantity::Temperature)),
            ("humidity", Field::rf("weather_station_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "450_6",
        location: "weather_station",
        fields: &[
            ("wind_avg_km_h", Field::rf("weather_station_WS", Quantity::WindSpeed)),
            ("wind_dir_deg", Field::rf("weather_station_A", Quantity::WindDirection)),
            ("rain_mm", WEATHER_STATION_R),
        ],
    },
    RfSensor {
        id: "450_7",
        location: "weather_station",
        fields: &[
            ("wind_avg_km_h", Field::rf("weather_station_WS", Quantity::WindSpeed)),
            ("uv", Field::rf("weather_station_UV", Quantity::UvIndex)),
            ("lux", Field::rf("weather_station_LUX", Quantity::Illuminance)),
        ],
    },
    RfSensor {
        id: "3838",
        location: "basement",
        fields: &[
            ("temperature_C", Field::rf("basement_T", Quantity::Temperature)),
            ("humidity", Field::rf("basement_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "3634",
        location: "outside_shade",
        fields: &[
            ("temperature_C", Field::rf("outside_shade_T", Quantity::Temperature)),
            ("humidity", Field::rf("outside_shade_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "7285",
        location: "attic",
        fields: &[
            ("temperature_C", Field::rf("attic_T", Quantity::Temperature)),
            ("humidity", Field::rf("attic_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "4856",
        location: "barn",
        fields: &[
            ("temperature_C", Field::rf("barn_T", Quantity::Temperature)),
            ("humidity", Field::rf("barn_H", Quantity::Humidity)),
        ],
    },
    RfSensor {
        id: "3202",
        location: "barn_sump",
        fields: &[
            ("temperature_C", Field::rf("barn_sump_T", Quantity::Temperature)),
            (
                "temperature_1_C",
                Field::rf("barn_sump_2_T", Quantity::SecondaryTemperature),
            ),
            ("humidity", Field::rf("barn_sump_H", Quantity::Humidity)),
        ],
    },
];

/// Power-meter channel label -> canonical circuit. Labels are matched
/// case-insensitively against the channel name, `main` also matches the
/// vendor's mains channel numbers.
pub static CIRCUIT_TABLE: &[(&str, Field)] = &[
    ("main", HOUSE_W),
    ("solar", SOLAR_W),
    ("dehumidifier", DEHUMIDIFIER_W),
];

static DERIVED_FIELDS: &[Field] = &[
    DAYLIGHT,
    POWER_TOT,
    T_DIFF,
    T_DIFF_EFF,
    COP,
    WELL_W,
    WELL_COP,
    BASE_LOAD_W,
    COP_MA,
    WELL_COP_MA,
    RAIN_ACCUM_R,
];

pub fn device_field(vendor_name: &str) -> Option<Field> {
    DEVICE_TABLE
        .iter()
        .find(|(name, _)| *name == vendor_name)
        .map(|(_, field)| *field)
}

pub fn rf_sensor(id: &str) -> Option<&'static RfSensor> {
    RF_TABLE.iter().find(|sensor| sensor.id == id)
}

pub fn rf_field(name: &str) -> Option<Field> {
    RF_TABLE
        .iter()
        .flat_map(|sensor| sensor.fields.iter())
        .map(|(_, field)| *field)
        .find(|field| field.name == name)
}

/// Resolves any canonical name, e.g. when reading documents back from the
/// store.
pub fn lookup(name: &str) -> Option<Field> {
    DEVICE_TABLE
        .iter()
        .map(|(_, field)| *field)
        .chain(CIRCUIT_TABLE.iter().map(|(_, field)| *field))
        .chain(DERIVED_FIELDS.iter().copied())
        .find(|field| field.name == name)
        .or_else(|| rf_field(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn all_fields() -> Vec<Field> {
        let mut fields: Vec<Field> = DEVICE_TABLE.iter().map(|(_, f)| *f).collect();
        fields.extend(RF_TABLE.iter().flat_map(|s| s.fields.iter().map(|(_, f)| *f)));
        fields.extend(CIRCUIT_TABLE.iter().map(|(_, f)| *f));
        fields.extend(DERIVED_FIELDS.iter().copied());
        fields
    }

    #[test]
    fn raw_field_names_carry_their_quantity_suffix() {
        for field in all_fields() {
            if matches!(field.source(), Source::Derived | Source::Clock) {
                continue;
            }
            let suffix = field
                .quantity()
                .suffix()
                .unwrap_or_else(|| panic!("{field} has a raw source but no suffix"));
            assert!(
                field.name().ends_with(&format!("_{suffix}")),
                "{field} should end with _{suffix}"
            );
        }
    }

    #[test]
    fn no_name_is_claimed_by_two_quantities() {
        let mut seen: HashMap<&str, Quantity> = HashMap::new();
        for field in all_fields() {
            if let Some(previous) = seen.insert(field.name(), field.quantity()) {
                assert_eq!(previous, field.quantity(), "{field} has conflicting quantities");
            }
        }
    }

    #[test]
    fn wind_speed_is_not_reported_as_power() {
        let wind = lookup("weather_station_WS").expect("wind field");
        assert_eq!(wind.unit(), Unit::KilometresPerHour);
        assert!(lookup("weather_station_W").is_none());
    }

    #[test]
    fn rf_quantity_keys_cover_every_sensor_entry() {
        for sensor in RF_TABLE {
            for (key, field) in sensor.fields {
                let quantity = RF_QUANTITIES
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, q)| *q)
                    .expect("known decoder key");
                assert_eq!(quantity, field.quantity());
                assert!(field.name().starts_with(sensor.location));
            }
        }
    }

    #[test]
    fn lookup_resolves_each_table() {
        assert_eq!(lookup("HP_W"), Some(HP_W));
        assert_eq!(lookup("basement_H").map(|f| f.source()), Some(Source::Rf));
        assert_eq!(lookup("solar_W"), Some(SOLAR_W));
        assert_eq!(lookup("COP"), Some(COP));
        assert_eq!(lookup("nope_T"), None);
    }
}
