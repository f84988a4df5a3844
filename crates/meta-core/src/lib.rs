pub mod builder;
pub mod dag;
pub mod materializer;
pub mod shape;
pub mod state;
pub mod types;

pub use builder::{build, BuildError};
pub use dag::{CompileError, CompiledDag};
pub use materializer::{materialize, MaterializeError};
pub use shape::{analyze, analyze_nested, enumerate_shards, ShapeError};
pub use state::{RunState, StateError};
pub use types::{
    render_coord, ArgumentRecord, FileBySample, FinalStatus, InputDecl, InputObject, InputType,
    MetaWorkflow, ParameterValue, Run, Shape, ShardCoord, ShardRecord, ShardStatus, Step,
    StepArgument,
};
