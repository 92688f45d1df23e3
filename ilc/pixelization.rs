//! Sphere pixelization and disc queries.
//!
//! The per-pixel disc estimator only needs three things from a pixelization:
//! its size, the unit vector of a pixel centre, and the set of pixels whose
//! centres fall inside a cone. [`SpherePixelization`] captures that, and
//! [`HealpixRing`] implements it for the HEALPix RING ordering.

use crate::error::PixelError;
use ndarray::Array2;
use std::f64::consts::{PI, TAU};

pub trait SpherePixelization: Sync {
    fn npix(&self) -> usize;

    /// Unit vector `[x, y, z]` of the centre of `ipix`.
    fn pix2vec(&self, ipix: usize) -> [f64; 3];

    /// Collects every pixel whose centre lies within `radius` radians of the
    /// centre of `ipix`. `out` is cleared first.
    fn query_disc(
        &self,
        ipix: usize,
        radius: f64,
        out: &mut DiscBuffer,
    ) -> Result<(), PixelError>;
}

/// Capacity-checked neighbour list reused across the pixels of one worker.
#[derive(Debug, Clone)]
pub struct DiscBuffer {
    indices: Vec<usize>,
    capacity: usize,
}

impl DiscBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            indices: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }

    #[inline]
    pub fn push(&mut self, ipix: usize) -> Result<(), PixelError> {
        if self.indices.len() == self.capacity {
            return Err(PixelError::DiscOverflow {
                capacity: self.capacity,
            });
        }
        self.indices.push(ipix);
        Ok(())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }
}

/// Geometry of one iso-latitude ring. Pixel `j` of the ring sits at
/// `phi = (j + phi_shift) * 2pi / len`.
#[derive(Debug, Clone, Copy)]
struct Ring {
    first: usize,
    len: usize,
    z: f64,
    phi_shift: f64,
}

/// HEALPix grid in RING ordering, `12 * nside^2` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealpixRing {
    nside: usize,
}

impl HealpixRing {
    /// Returns `None` for `nside == 0`.
    pub fn new(nside: usize) -> Option<Self> {
        (nside > 0).then_some(Self { nside })
    }

    fn ncap(&self) -> usize {
        2 * self.nside * (self.nside - 1)
    }

    fn nrings(&self) -> usize {
        4 * self.nside - 1
    }

    /// Ring numbers run from 1 (north) to `4 nside - 1` (south).
    fn ring(&self, ring: usize) -> Ring {
        let nside = self.nside;
        let fns = nside as f64;
        if ring < nside {
            Ring {
                first: 2 * ring * (ring - 1),
                len: 4 * ring,
                z: 1.0 - (ring * ring) as f64 / (3.0 * fns * fns),
                phi_shift: 0.5,
            }
        } else if ring <= 3 * nside {
            let shifted = (ring - nside) % 2 == 0;
            Ring {
                first: self.ncap() + (ring - nside) * 4 * nside,
                len: 4 * nside,
                z: 4.0 / 3.0 - 2.0 * ring as f64 / (3.0 * fns),
                phi_shift: if shifted { 0.5 } else { 0.0 },
            }
        } else {
            let mirror = 4 * nside - ring;
            Ring {
                first: self.npix() - 2 * mirror * (mirror + 1),
                len: 4 * mirror,
                z: -(1.0 - (mirror * mirror) as f64 / (3.0 * fns * fns)),
                phi_shift: 0.5,
            }
        }
    }

    /// Ring number and in-ring offset of a pixel.
    fn locate(&self, ipix: usize) -> (usize, usize) {
        let nside = self.nside;
        let npix = self.npix();
        let ncap = self.ncap();
        if ipix < ncap {
            let ring = (1 + isqrt(1 + 2 * ipix)) / 2;
            (ring, ipix - 2 * ring * (ring - 1))
        } else if ipix < npix - ncap {
            let ip = ipix - ncap;
            (ip / (4 * nside) + nside, ip % (4 * nside))
        } else {
            let ip = npix - ipix;
            let mirror = (1 + isqrt(2 * ip - 1)) / 2;
            let ring = 4 * nside - mirror;
            let first = npix - 2 * mirror * (mirror + 1);
            (ring, ipix - first)
        }
    }

    /// Unit vectors of every pixel, shape `[3, npix]`.
    pub fn unit_vectors(&self) -> Array2<f64> {
        let npix = self.npix();
        let mut vecs = Array2::zeros((3, npix));
        for ipix in 0..npix {
            let v = self.pix2vec(ipix);
            for k in 0..3 {
                vecs[(k, ipix)] = v[k];
            }
        }
        vecs
    }
}

impl SpherePixelization for HealpixRing {
    fn npix(&self) -> usize {
        12 * self.nside * self.nside
    }

    fn pix2vec(&self, ipix: usize) -> [f64; 3] {
        let (ring_no, j) = self.locate(ipix);
        let ring = self.ring(ring_no);
        let phi = (j as f64 + ring.phi_shift) * TAU / ring.len as f64;
        let sin_theta = ((1.0 - ring.z) * (1.0 + ring.z)).sqrt();
        [sin_theta * phi.cos(), sin_theta * phi.sin(), ring.z]
    }

    fn query_disc(
        &self,
        ipix: usize,
        radius: f64,
        out: &mut DiscBuffer,
    ) -> Result<(), PixelError> {
        out.clear();
        let centre = self.pix2vec(ipix);
        let cos_radius = radius.min(PI).cos();
        let z0 = centre[2];
        let theta0 = z0.clamp(-1.0, 1.0).acos();
        let sin_theta0 = ((1.0 - z0) * (1.0 + z0)).sqrt();
        let phi0 = centre[1].atan2(centre[0]).rem_euclid(TAU);
        let touches_pole = theta0 - radius <= 0.0 || theta0 + radius >= PI;

        for ring_no in 1..=self.nrings() {
            let ring = self.ring(ring_no);
            let theta = ring.z.clamp(-1.0, 1.0).acos();
            if (theta - theta0).abs() > radius + RING_SLACK {
                continue;
            }
            let sin_theta = ((1.0 - ring.z) * (1.0 + ring.z)).sqrt();
            let len = ring.len as i64;

            let (lo, hi) = if touches_pole || sin_theta0 < 1e-12 || sin_theta < 1e-12 {
                (0, len - 1)
            } else {
                let cos_dphi = (cos_radius - ring.z * z0) / (sin_theta * sin_theta0);
                let dphi = cos_dphi.clamp(-1.0, 1.0).acos() + PHI_SLACK;
                let step = TAU / ring.len as f64;
                let lo = ((phi0 - dphi) / step - ring.phi_shift).ceil() as i64;
                let hi = ((phi0 + dphi) / step - ring.phi_shift).floor() as i64;
                if hi - lo + 1 >= len { (0, len - 1) } else { (lo, hi) }
            };

            for j in lo..=hi {
                let candidate = ring.first + j.rem_euclid(len) as usize;
                if within_disc(&centre, &self.pix2vec(candidate), cos_radius) {
                    out.push(candidate)?;
                }
            }
        }
        Ok(())
    }
}

const RING_SLACK: f64 = 1e-9;
const PHI_SLACK: f64 = 1e-9;

/// Centre-in-cone test shared by the pruned and exhaustive paths.
#[inline]
fn within_disc(centre: &[f64; 3], candidate: &[f64; 3], cos_radius: f64) -> bool {
    let dot = centre[0] * candidate[0] + centre[1] * candidate[1] + centre[2] * candidate[2];
    dot >= cos_radius - 1e-14
}

fn isqrt(v: usize) -> usize {
    let mut r = (v as f64).sqrt() as usize;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}
