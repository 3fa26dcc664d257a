use std::sync::Mutex;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// A bounded thread-safe free list of reusable objects.
///
/// An optional factory builds objects on demand when the pool is empty; an
/// optional reset hook scrubs objects on their way back in. Objects released
/// into a saturated pool are simply dropped.
pub struct ObjectPool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
    factory: Option<Factory<T>>,
    reset: Option<Reset<T>>,
}

impl<T> ObjectPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            factory: None,
            reset: None,
        }
    }

    pub fn with_factory(mut self, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn with_reset(mut self, reset: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Take an object from the free list, falling back to the factory.
    ///
    /// `None` only when the pool is empty and has no factory.
    pub fn acquire(&self) -> Option<T> {
        if let Some(object) = self.free.lock().unwrap().pop() {
            return Some(object);
        }
        self.factory.as_ref().map(|factory| factory())
    }

    /// Return an object to the pool; drops it when the pool is saturated.
    pub fn release(&self, mut object: T) {
        if let Some(reset) = &self.reset {
            reset(&mut object);
        }
        let mut free = self.free.lock().unwrap();
        if free.len() < self.capacity {
            free.push(object);
        }
    }

    /// Number of objects currently parked in the pool.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}
