pub mod task_spawner;

pub use task_spawner::{LoopTask, NoopTaskSpawner, TaskSpawner, TokioTaskSpawner};
