//! Delta trait: rules for fusing halo data into a local buffer

/// *Delta* encapsulates how an incoming halo value fuses into a local `V`.
///
/// Export slabs travel as plain values (see `RegionDescriptor::pack`), so
/// only the receiving side is delta-specific.
pub trait ValueDelta<V>: Sized {
    /// What an incoming fragment looks like (often identical to `V`).
    type Part: Send;

    /// Merge an incoming fragment into the local value.
    fn fuse(local: &mut V, incoming: Self::Part);
}

/// Identity delta (copy-overwrites-local), used by copy exchange.
#[derive(Copy, Clone, Debug)]
pub struct CopyDelta;

impl<V: Copy + Send> ValueDelta<V> for CopyDelta {
    type Part = V;
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local = incoming;
    }
}

/// Additive delta, used by sum exchange of deposited densities.
#[derive(Copy, Clone, Debug)]
pub struct AddDelta;

impl<V> ValueDelta<V> for AddDelta
where
    V: num_traits::NumAssign + Copy + Send,
{
    type Part = V;
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local += incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_overwrites_add_accumulates() {
        let mut a = 1.5f64;
        CopyDelta::fuse(&mut a, 4.0);
        assert_eq!(a, 4.0);
        AddDelta::fuse(&mut a, 0.25);
        assert_eq!(a, 4.25);
    }

    #[test]
    fn fuse_is_generic_over_numeric_values() {
        let mut n = 3i64;
        AddDelta::fuse(&mut n, -5);
        assert_eq!(n, -2);
        CopyDelta::fuse(&mut n, 7);
        assert_eq!(n, 7);
    }
}
