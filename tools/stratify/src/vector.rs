//! GeoJSON polygon layers in, class polygons out.
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use log::warn;
use serde_json::json;
use strat_core::{ClassFeature, Crs, VectorFeature, VectorLayer};

/// CRS from a legacy `crs` member (`EPSG:32643`,
/// `urn:ogc:def:crs:EPSG::32643`, `urn:ogc:def:crs:OGC:1.3:CRS84`).
fn crs_from_name(name: &str) -> Option<Crs> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.ends_with("CRS84") {
        return Some(Crs::wgs84());
    }
    let code: u32 = upper.rsplit(':').next()?.parse().ok()?;
    upper.contains("EPSG").then(|| Crs::epsg(code))
}

fn declared_crs(collection: &FeatureCollection) -> Option<Crs> {
    let name = collection
        .foreign_members
        .as_ref()?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    crs_from_name(name)
}

fn property_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a feature collection of (multi)polygons. Features in a collection
/// without a `crs` member are taken to be in `default_crs`; other geometry
/// types are skipped with a warning.
pub fn parse_layer(text: &str, default_crs: &Crs) -> Result<VectorLayer> {
    let collection = FeatureCollection::try_from(text.parse::<GeoJson>()?)?;
    let crs = declared_crs(&collection).unwrap_or_else(|| default_crs.clone());

    let mut features = Vec::with_capacity(collection.features.len());
    let mut skipped = 0usize;
    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            skipped += 1;
            continue;
        };
        let multi = match geo_types::Geometry::<f64>::try_from(geometry.value)? {
            geo_types::Geometry::Polygon(p) => geo_types::MultiPolygon(vec![p]),
            geo_types::Geometry::MultiPolygon(mp) => mp,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let mut out = VectorFeature::new(multi);
        for (key, value) in feature.properties.unwrap_or_default() {
            out = out.with_property(key, property_string(&value));
        }
        features.push(out);
    }
    if skipped > 0 {
        warn!("skipped {skipped} feature(s) without polygon geometry");
    }
    Ok(VectorLayer::new(crs, features))
}

pub fn read_layer(path: &Path, default_crs: &Crs) -> Result<VectorLayer> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let layer = parse_layer(&text, default_crs).with_context(|| format!("Failed to parse {}", path.display()))?;
    if layer.is_empty() {
        warn!("{} holds no polygons", path.display());
    }
    Ok(layer)
}

/// Class polygons as a feature collection with `code` / `name` properties.
pub fn class_collection(features: &[ClassFeature], crs: &Crs) -> FeatureCollection {
    let features = features
        .iter()
        .map(|f| {
            let mut properties = JsonObject::new();
            properties.insert("code".to_string(), json!(f.code));
            properties.insert("name".to_string(), json!(f.name));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::from(&f.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let mut foreign = JsonObject::new();
    foreign.insert(
        "crs".to_string(),
        json!({ "type": "name", "properties": { "name": crs.as_str() } }),
    );
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    }
}

pub fn write_classes(path: &Path, features: &[ClassFeature], crs: &Crs) -> Result<()> {
    if features.is_empty() {
        bail!("no class polygons to write");
    }
    fs::write(path, class_collection(features, crs).to_string())
        .with_context(|| format!("Write failed: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{polygon, MultiPolygon};

    const GLACIERS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"rgi_id": "RGI60-13.00001", "area": 1.5},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature", "properties": null,
             "geometry": {"type": "Point", "coordinates": [5, 5]}},
            {"type": "Feature", "properties": {}, "geometry": null}
        ]
    }"#;

    #[test]
    fn keeps_polygons_and_stringifies_properties() {
        let layer = parse_layer(GLACIERS, &Crs::epsg(32643)).unwrap();
        assert_eq!(layer.crs, Crs::epsg(32643));
        assert_eq!(layer.len(), 1);
        let f = &layer.features[0];
        assert_eq!(f.property("rgi_id"), Some("RGI60-13.00001"));
        assert_eq!(f.property("area"), Some("1.5"));
        assert_eq!(f.geometry.0.len(), 1);
    }

    #[test]
    fn legacy_crs_member_wins_over_default() {
        let text = r#"{"type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32644"}},
            "features": []}"#;
        assert_eq!(parse_layer(text, &Crs::epsg(32643)).unwrap().crs, Crs::epsg(32644));
    }

    #[test]
    fn crs_names() {
        assert_eq!(crs_from_name("EPSG:4326"), Some(Crs::wgs84()));
        assert_eq!(crs_from_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(Crs::wgs84()));
        assert_eq!(crs_from_name("urn:ogc:def:crs:EPSG::32643"), Some(Crs::epsg(32643)));
        assert_eq!(crs_from_name("local"), None);
    }

    #[test]
    fn class_collection_round_trips_through_parse() {
        let square = MultiPolygon(vec![polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)]]);
        let features = vec![ClassFeature {
            code: 3,
            name: "bedrock".into(),
            geometry: square.clone(),
        }];
        let text = class_collection(&features, &Crs::epsg(32643)).to_string();
        let layer = parse_layer(&text, &Crs::wgs84()).unwrap();
        assert_eq!(layer.crs, Crs::epsg(32643));
        assert_eq!(layer.features[0].property("code"), Some("3"));
        assert_eq!(layer.features[0].property("name"), Some("bedrock"));
        assert_eq!(layer.features[0].geometry, square);
    }
}
