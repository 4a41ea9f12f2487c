use geo::{CoordNum, Rect};

use crate::errors::{RasterOpsError, Result};

pub trait Intersection {
    type Output;
    fn intersection(&self, rhs: &Self) -> Result<Self::Output>;
}

impl<T: CoordNum> Intersection for Rect<T> {
    type Output = Rect<T>;
    /// Fails when the overlap of both rects is empty.
    fn intersection(&self, rhs: &Self) -> Result<Rect<T>> {
        let lhs_max = self.max();
        let rhs_min = rhs.min();
        if (lhs_max.x <= rhs_min.x) | (lhs_max.y <= rhs_min.y) {
            return Err(RasterOpsError::NoIntersection);
        }

        let lhs_min = self.min();
        let rhs_max = rhs.max();
        if (lhs_min.x >= rhs_max.x) | (lhs_min.y >= rhs_max.y) {
            return Err(RasterOpsError::NoIntersection);
        }

        let max_of = |x: T, y: T| if x > y { x } else { y };
        let min_of = |x: T, y: T| if x < y { x } else { y };
        let min = (max_of(lhs_min.x, rhs_min.x), max_of(lhs_min.y, rhs_min.y));
        let max = (min_of(lhs_max.x, rhs_max.x), min_of(lhs_max.y, rhs_max.y));

        Ok(Self::new(min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(((0, 0), (4, 4)), ((2, 2), (6, 6)), Some(((2, 2), (4, 4))))]
    #[case(((0, 0), (4, 4)), ((1, 1), (2, 2)), Some(((1, 1), (2, 2))))]
    #[case(((0, 0), (4, 4)), ((4, 0), (6, 4)), None)]
    #[case(((0, 0), (4, 4)), ((5, 5), (6, 6)), None)]
    fn rect_intersection(
        #[case] lhs: ((usize, usize), (usize, usize)),
        #[case] rhs: ((usize, usize), (usize, usize)),
        #[case] expected: Option<((usize, usize), (usize, usize))>,
    ) {
        let lhs = Rect::new(lhs.0, lhs.1);
        let rhs = Rect::new(rhs.0, rhs.1);
        let result = lhs.intersection(&rhs).ok();
        assert_eq!(result, expected.map(|(min, max)| Rect::new(min, max)));
    }
}
