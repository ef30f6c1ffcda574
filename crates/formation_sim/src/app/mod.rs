mod bootstrap;
mod loop_runner;
mod scenario;
mod sim_config;
mod sim_world;

#[cfg(test)]
mod test_support;

pub(crate) use bootstrap::{build_app, init_tracing};
pub(crate) use loop_runner::run;
