// Protocol converter module

pub mod openai;
