//! The closed sets of layer names the service answers for.
//!
//! Names are matched exactly (`RIVER`, not `river`); anything else is
//! rejected with [`ServiceError::UnknownCategory`] before a layer is touched.

use std::fmt;
use std::str::FromStr;

use foundation::ServiceError;

/// A queryable feature layer backed by a spatial index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    River,
    Lake,
    Reservoir,
    Road,
    Pathway,
    Powerline,
    Piste,
    Peak,
    Col,
    Skilift,
    City,
    Town,
    Village,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::River,
        Category::Lake,
        Category::Reservoir,
        Category::Road,
        Category::Pathway,
        Category::Powerline,
        Category::Piste,
        Category::Peak,
        Category::Col,
        Category::Skilift,
        Category::City,
        Category::Town,
        Category::Village,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::River => "RIVER",
            Category::Lake => "LAKE",
            Category::Reservoir => "RESERVOIR",
            Category::Road => "ROAD",
            Category::Pathway => "PATHWAY",
            Category::Powerline => "POWERLINE",
            Category::Piste => "PISTE",
            Category::Peak => "PEAK",
            Category::Col => "COL",
            Category::Skilift => "SKILIFT",
            Category::City => "CITY",
            Category::Town => "TOWN",
            Category::Village => "VILLAGE",
        }
    }

    /// GeoJSON file in the data directory holding this layer.
    pub fn source_file(self) -> &'static str {
        match self {
            Category::River => "eaux_courantes_choucas.geojson",
            Category::Lake => "water_lake_choucas.geojson",
            Category::Reservoir => "water_reservoir_choucas.geojson",
            Category::Road => "routes_choucas.geojson",
            Category::Pathway => "sentiers_choucas.geojson",
            Category::Powerline => "powerline_choucas.geojson",
            Category::Piste => "pistes_choucas.geojson",
            Category::Peak => "peak_choucas.geojson",
            Category::Col => "col_choucas.geojson",
            Category::Skilift => "cable_skilift_choucas.geojson",
            Category::City => "city_choucas.geojson",
            Category::Town => "town_choucas.geojson",
            Category::Village => "village_choucas.geojson",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| ServiceError::UnknownCategory(s.to_string()))
    }
}

/// An outdoor activity whose layer is served whole.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Activity {
    Ski,
    Randonnee,
    Speleologie,
    Escalade,
    Vtt,
}

impl Activity {
    pub const ALL: [Activity; 5] = [
        Activity::Ski,
        Activity::Randonnee,
        Activity::Speleologie,
        Activity::Escalade,
        Activity::Vtt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Activity::Ski => "ski",
            Activity::Randonnee => "randonnee",
            Activity::Speleologie => "speleologie",
            Activity::Escalade => "escalade",
            Activity::Vtt => "vtt",
        }
    }

    /// `None` for activities without a dedicated layer; they answer an empty
    /// collection.
    pub fn source_file(self) -> Option<&'static str> {
        match self {
            Activity::Ski => Some("domaine_station_remontee_ski_choucas_large.geojson"),
            Activity::Randonnee => None,
            Activity::Speleologie => Some("cave_entrance_speleologie_choucas_large.geojson"),
            Activity::Escalade => Some("sport_climbing_escalade_choucas_large.geojson"),
            Activity::Vtt => Some("mtb_scale_vtt_choucas_large.geojson"),
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activity {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Activity::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| ServiceError::UnknownCategory(s.to_string()))
    }
}
