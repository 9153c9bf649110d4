pub mod compare;
pub mod stack;

mod axes_draw;
mod steps;
