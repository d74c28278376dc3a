/// A logical NCHW coordinate into a rank-4 activation tensor.
///
/// `n` and the spatial components are signed so that a coordinate may point
/// into the padding halo (negative, or past the extent); layouts only accept
/// in-bounds coordinates, iterators use the signed form for predicate tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coord4d {
    pub n: isize,
    pub c: isize,
    pub h: isize,
    pub w: isize,
}

impl Coord4d {
    pub fn new(n: isize, c: isize, h: isize, w: isize) -> Self {
        Coord4d { n, c, h, w }
    }

    /// True if the coordinate lies inside `[0, extent)` on every axis.
    pub fn in_bounds(&self, extent: [usize; 4]) -> bool {
        self.n >= 0
            && (self.n as usize) < extent[0]
            && self.c >= 0
            && (self.c as usize) < extent[1]
            && self.h >= 0
            && (self.h as usize) < extent[2]
            && self.w >= 0
            && (self.w as usize) < extent[3]
    }
}
