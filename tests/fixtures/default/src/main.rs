fn main() {
    println!("{}", sample::greet("world"));
}
