#[derive(Copy, Clone, Default, Debug)]
pub struct IdCounter {
    counter: u64,
}

impl IdCounter {
    pub fn new(initial_value: u64) -> Self {
        Self {
            counter: initial_value,
        }
    }

    pub fn increment(&mut self) -> u64 {
        let value = self.counter;
        self.counter += 1;
        value
    }
}
