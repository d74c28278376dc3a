use half::f16;
use ig_tensor::Element;

/// Wide partial-sum type used inside accumulator fragments.
pub trait Accumulator: Element {
    /// `self + a * b`, in the wide type.
    fn mul_add(self, a: Self, b: Self) -> Self;

    /// Conversion into the epilogue compute type.
    fn into_compute(self) -> f32;
}

impl Accumulator for f32 {
    fn mul_add(self, a: f32, b: f32) -> f32 {
        self + a * b
    }

    fn into_compute(self) -> f32 {
        self
    }
}

impl Accumulator for i32 {
    fn mul_add(self, a: i32, b: i32) -> i32 {
        self + a * b
    }

    fn into_compute(self) -> f32 {
        self as f32
    }
}

/// Widening conversion from a storage element into an accumulator type.
pub trait Promote<A: Accumulator>: Element {
    fn promote(self) -> A;
}

impl Promote<f32> for f32 {
    fn promote(self) -> f32 {
        self
    }
}

impl Promote<f32> for f16 {
    fn promote(self) -> f32 {
        self.to_f32()
    }
}

impl Promote<i32> for i8 {
    fn promote(self) -> i32 {
        self as i32
    }
}

impl Promote<i32> for u8 {
    fn promote(self) -> i32 {
        self as i32
    }
}

impl Promote<i32> for i32 {
    fn promote(self) -> i32 {
        self
    }
}

/// Narrowing conversion from the epilogue compute type into the output
/// element type.
///
/// Integer targets round to nearest (ties away from zero, `f32::round`)
/// before saturating at the type's representable range; `as` casts from f32
/// saturate rather than wrap.
pub trait OutputElement: Element {
    fn from_compute(x: f32) -> Self;

    /// Widening read of an already-stored output element, used when the
    /// epilogue adds a residual term.
    fn to_compute(self) -> f32;
}

impl OutputElement for f32 {
    fn from_compute(x: f32) -> f32 {
        x
    }

    fn to_compute(self) -> f32 {
        self
    }
}

impl OutputElement for f16 {
    fn from_compute(x: f32) -> f16 {
        f16::from_f32(x)
    }

    fn to_compute(self) -> f32 {
        self.to_f32()
    }
}

impl OutputElement for i8 {
    fn from_compute(x: f32) -> i8 {
        x.round() as i8
    }

    fn to_compute(self) -> f32 {
        self as f32
    }
}

impl OutputElement for u8 {
    fn from_compute(x: f32) -> u8 {
        x.round() as u8
    }

    fn to_compute(self) -> f32 {
        self as f32
    }
}

impl OutputElement for i32 {
    fn from_compute(x: f32) -> i32 {
        x.round() as i32
    }

    fn to_compute(self) -> f32 {
        self as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_nearest() {
        assert_eq!(i8::from_compute(2.4), 2);
        assert_eq!(i8::from_compute(2.5), 3);
        assert_eq!(i8::from_compute(-2.5), -3);
        assert_eq!(i32::from_compute(0.49), 0);
    }

    #[test]
    fn test_saturating_narrow() {
        // Exactly at the bound clamps to the bound.
        assert_eq!(i8::from_compute(127.0), 127);
        assert_eq!(i8::from_compute(-128.0), -128);
        // Past the bound saturates, never wraps.
        assert_eq!(i8::from_compute(300.0), 127);
        assert_eq!(i8::from_compute(-300.0), -128);
        assert_eq!(u8::from_compute(-5.0), 0);
        assert_eq!(u8::from_compute(256.0), 255);
    }

    #[test]
    fn test_promote_widens() {
        assert_eq!(<i8 as Promote<i32>>::promote(-7i8), -7i32);
        assert_eq!(<u8 as Promote<i32>>::promote(200u8), 200i32);
        assert_eq!(<f16 as Promote<f32>>::promote(f16::from_f32(1.5)), 1.5);
    }

    #[test]
    fn test_mul_add() {
        assert_eq!(Accumulator::mul_add(10i32, 3, 4), 22);
        assert_eq!(Accumulator::mul_add(1.0f32, 2.0, 0.5), 2.0);
    }
}
