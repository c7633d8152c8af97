fn main() {
    double_density_sph::start();
}
