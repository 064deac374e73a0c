//! Fixtures shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use las::point::Classification;
use las::{Point, Writer};
use serde_json::json;

use crate::cancel::CancelToken;
use crate::download::{Body, Fetch};
use crate::error::{Error, Result};

pub type Ring = Vec<[f64; 2]>;

pub fn square(min_x: f64, min_y: f64, size: f64) -> Ring {
    vec![
        [min_x, min_y],
        [min_x + size, min_y],
        [min_x + size, min_y + size],
        [min_x, min_y + size],
        [min_x, min_y],
    ]
}

/// GeoJSON text with one polygon feature per ring, optionally carrying a
/// `url_telech` attribute.
pub fn feature_collection(epsg: u32, features: &[(Ring, Option<&str>)]) -> String {
    let features: Vec<_> = features
        .iter()
        .map(|(ring, url)| {
            let properties = match url {
                Some(url) => json!({ "url_telech": url }),
                None => json!({}),
            };
            json!({
                "type": "Feature",
                "properties": properties,
                "geometry": { "type": "Polygon", "coordinates": [ring] },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": format!("urn:ogc:def:crs:EPSG::{epsg}") } },
        "features": features,
    })
    .to_string()
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Writes an uncompressed LAS file from `(x, y, z, classification)` tuples.
pub fn write_las(path: &Path, points: &[(f64, f64, f64, u8)]) {
    let mut writer = Writer::from_path(path, Default::default()).unwrap();
    for &(x, y, z, class) in points {
        writer
            .write_point(Point {
                x,
                y,
                z,
                classification: Classification::new(class).unwrap(),
                ..Default::default()
            })
            .unwrap();
    }
    writer.close().unwrap();
}

/// Ground points on a regular lattice covering `[0, size]²`, every one at
/// height `z`.
pub fn ground_lattice(size: f64, step: f64, z: f64) -> Vec<(f64, f64, f64, u8)> {
    let n = (size / step).round() as usize;
    let mut points = Vec::new();
    for i in 0..=n {
        for j in 0..=n {
            points.push((i as f64 * step, j as f64 * step, z, 2));
        }
    }
    points
}

/// How a `FakeFetch` answers one URL.
enum Response {
    Complete(Vec<u8>),
    /// Announces `len` bytes but sends fewer.
    Truncated { body: Vec<u8>, len: u64 },
    /// Sends the body, then fails the next read.
    Broken(Vec<u8>),
    /// Sets the token as soon as the first chunk is read.
    Cancelling(Vec<u8>, CancelToken),
}

/// Reader that yields its body once, then either errors or trips a
/// cancel token.
struct Interrupted {
    body: Cursor<Vec<u8>>,
    cancel: Option<CancelToken>,
}

impl Read for Interrupted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
            return self.body.read(buf);
        }

        match self.body.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
            n => Ok(n),
        }
    }
}

/// In-memory `Fetch` that serves fixed bodies and counts requests.
#[derive(Default)]
pub struct FakeFetch {
    bodies: HashMap<String, Response>,
    requests: Cell<usize>,
    requested: RefCell<Vec<String>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), Response::Complete(body));
        self
    }

    pub fn serve_truncated(mut self, url: &str, body: Vec<u8>, len: u64) -> Self {
        self.bodies
            .insert(url.to_string(), Response::Truncated { body, len });
        self
    }

    pub fn serve_broken(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), Response::Broken(body));
        self
    }

    pub fn serve_then_cancel(mut self, url: &str, body: Vec<u8>, cancel: CancelToken) -> Self {
        self.bodies
            .insert(url.to_string(), Response::Cancelling(body, cancel));
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.get()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }
}

impl Fetch for FakeFetch {
    fn get(&self, url: &str) -> Result<Body> {
        self.requests.set(self.requests.get() + 1);
        self.requested.borrow_mut().push(url.to_string());

        let (len, reader): (u64, Box<dyn Read + Send>) = match self.bodies.get(url) {
            Some(Response::Complete(body)) => {
                (body.len() as u64, Box::new(Cursor::new(body.clone())))
            }
            Some(Response::Truncated { body, len }) => (*len, Box::new(Cursor::new(body.clone()))),
            Some(Response::Broken(body)) => (
                body.len() as u64 + 1,
                Box::new(Interrupted {
                    body: Cursor::new(body.clone()),
                    cancel: None,
                }),
            ),
            Some(Response::Cancelling(body, cancel)) => (
                body.len() as u64,
                Box::new(Interrupted {
                    body: Cursor::new(body.clone()),
                    cancel: Some(cancel.clone()),
                }),
            ),
            None => {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
            }
        };

        Ok(Body {
            len: Some(len),
            reader,
        })
    }
}
