use serde::Serialize;
use tracing::debug;

use crate::markers::{project_markers, Marker};
use crate::projection::Projector;

/// A group of markers drawn as one symbol.
///
/// `projected_center` is the mean of the members' projected positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub members: Vec<Marker>,
    pub projected_center: (f64, f64),
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// Working state of a cluster while the pass is running
struct Seed {
    anchor: (f64, f64),
    sum: (f64, f64),
    members: Vec<usize>,
}

/// Groups markers by on-screen proximity.
///
/// Markers are visited in input order. Each one joins the first existing
/// cluster whose anchor (the projected position of the marker that opened it)
/// lies within `distance_threshold_px`, otherwise it opens a new cluster.
/// A threshold of zero or below never merges anything.
pub fn cluster<P>(markers: &[Marker], distance_threshold_px: f64, projector: &P) -> Vec<Cluster>
where
    P: Projector + Sync,
{
    if markers.is_empty() {
        return Vec::new();
    }

    let points = project_markers(markers, projector);
    let merge = distance_threshold_px > 0.0;
    let limit_sq = distance_threshold_px * distance_threshold_px;

    let mut seeds: Vec<Seed> = Vec::new();
    for (idx, &point) in points.iter().enumerate() {
        let joined = merge
            && seeds
                .iter_mut()
                .find(|seed| squared_distance(seed.anchor, point) <= limit_sq)
                .map(|seed| {
                    seed.members.push(idx);
                    seed.sum.0 += point.0;
                    seed.sum.1 += point.1;
                })
                .is_some();

        if !joined {
            seeds.push(Seed {
                anchor: point,
                sum: point,
                members: vec![idx],
            });
        }
    }

    debug!(
        "Clustered {} markers into {} clusters (distance {}px)",
        markers.len(),
        seeds.len(),
        distance_threshold_px
    );

    seeds
        .into_iter()
        .map(|seed| {
            let n = seed.members.len() as f64;
            Cluster {
                projected_center: (seed.sum.0 / n, seed.sum.1 / n),
                members: seed.members.into_iter().map(|i| markers[i].clone()).collect(),
            }
        })
        .collect()
}

fn squared_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    // Treats lon/lat directly as pixels
    struct Identity;

    impl Projector for Identity {
        fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
            (lon, lat)
        }
    }

    fn line_of_markers() -> Vec<Marker> {
        vec![
            Marker::new(0.0, 0.0, "A"),
            Marker::new(5.0, 0.0, "A"),
            Marker::new(100.0, 0.0, "B"),
            Marker::new(3.0, 4.0, "C"),
            Marker::new(104.0, 3.0, "B"),
        ]
    }

    #[test]
    fn empty_input_gives_no_clusters() {
        assert!(cluster(&[], 50.0, &Identity).is_empty());
    }

    #[test]
    fn groups_by_anchor_distance() {
        let clusters = cluster(&line_of_markers(), 5.0, &Identity);
        assert_eq!(clusters.len(), 2);

        let kinds: Vec<&str> = clusters[0].members.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, vec!["A", "A", "C"]);
        assert_eq!(clusters[1].len(), 2);
        assert_eq!(clusters[1].projected_center, (102.0, 1.5));
    }

    #[test]
    fn threshold_is_inclusive() {
        let markers = vec![Marker::new(0.0, 0.0, "A"), Marker::new(10.0, 0.0, "A")];
        assert_eq!(cluster(&markers, 10.0, &Identity).len(), 1);
        assert_eq!(cluster(&markers, 9.999, &Identity).len(), 2);
    }

    #[test]
    fn zero_or_negative_threshold_keeps_singletons() {
        let markers = vec![Marker::new(1.0, 1.0, "A"), Marker::new(1.0, 1.0, "A")];
        for threshold in [0.0, -3.0] {
            let clusters = cluster(&markers, threshold, &Identity);
            assert_eq!(clusters.len(), 2);
            assert!(clusters.iter().all(|c| c.len() == 1));
        }
    }

    #[test]
    fn first_matching_cluster_wins() {
        // The third marker is within range of both anchors; it joins the older one
        let markers = vec![
            Marker::new(0.0, 0.0, "A"),
            Marker::new(8.0, 0.0, "A"),
            Marker::new(4.0, 0.0, "B"),
        ];
        let clusters = cluster(&markers, 5.0, &Identity);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members[1].kind, "B");
    }

    #[test]
    fn repeated_runs_are_identical() {
        let markers = line_of_markers();
        let first = cluster(&markers, 6.0, &Identity);
        for _ in 0..10 {
            assert_eq!(cluster(&markers, 6.0, &Identity), first);
        }
    }

    #[test]
    fn every_marker_lands_in_exactly_one_cluster() {
        let markers: Vec<Marker> = (0..200)
            .map(|i| {
                let f = i as f64;
                Marker::new((f * 7.3) % 97.0, (f * 3.1) % 41.0, if i % 3 == 0 { "A" } else { "B" })
            })
            .collect();

        for threshold in [0.0, 1.0, 12.5, 1_000.0] {
            let clusters = cluster(&markers, threshold, &Identity);
            let total: usize = clusters.iter().map(Cluster::len).sum();
            assert_eq!(total, markers.len());

            let mut seen: Vec<Marker> = clusters.into_iter().flat_map(|c| c.members).collect();
            let mut expected = markers.clone();
            let key = |m: &Marker| (m.longitude.to_bits(), m.latitude.to_bits(), m.kind.clone());
            seen.sort_by_key(key);
            expected.sort_by_key(key);
            assert_eq!(seen, expected);
        }
    }
}
