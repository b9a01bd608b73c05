mod rule;

pub use rule::UpdateRule;
