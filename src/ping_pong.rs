//! Two-slot ping-pong bookkeeping for iterative blurs.
//!
//! Slot 0 holds the input. Iteration `i` reads slot `i % 2` and writes slot
//! `(i + 1) % 2`, so no iteration ever samples the texture it renders to and
//! the result of `n` iterations lives in slot `n % 2`.

/// A pair of resources alternated between iterations.
#[derive(Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
}

impl<T> PingPong<T> {
    pub fn new(input: T, scratch: T) -> Self {
        Self {
            slots: [input, scratch],
        }
    }

    pub fn slot(&self, index: usize) -> &T {
        &self.slots[index % 2]
    }

    /// Slot iteration `i` samples from.
    pub fn source(&self, iteration: usize) -> &T {
        self.slot(source_slot(iteration))
    }

    /// Slot iteration `i` renders to.
    pub fn destination(&self, iteration: usize) -> &T {
        self.slot(destination_slot(iteration))
    }

    /// Slot holding the result after `iterations` passes.
    pub fn result(&self, iterations: usize) -> &T {
        self.slot(result_slot(iterations))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

pub fn source_slot(iteration: usize) -> usize {
    iteration % 2
}

pub fn destination_slot(iteration: usize) -> usize {
    (iteration + 1) % 2
}

pub fn result_slot(iterations: usize) -> usize {
    iterations % 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_reads_own_target() {
        for i in 0..16 {
            assert_ne!(source_slot(i), destination_slot(i));
            // Each iteration reads what the previous one wrote.
            if i > 0 {
                assert_eq!(source_slot(i), destination_slot(i - 1));
            }
        }
    }

    #[test]
    fn test_result_slot() {
        let pair = PingPong::new("input", "scratch");
        assert_eq!(*pair.result(0), "input");
        assert_eq!(*pair.result(3), "scratch");
        assert_eq!(*pair.result(4), "input");
        assert_eq!(*pair.destination(3), *pair.result(4));
    }

    #[test]
    fn test_separable_blur_lands_in_input_slot() {
        // Horizontal then vertical is two iterations.
        let pair = PingPong::new(0, 1);
        assert_eq!(*pair.source(0), 0);
        assert_eq!(*pair.destination(0), 1);
        assert_eq!(*pair.source(1), 1);
        assert_eq!(*pair.result(2), 0);
    }
}
